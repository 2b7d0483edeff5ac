use std::{
    io,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use thiserror::Error;

use crate::{
    compile::Program,
    protocol::{Envelope, InitMessage},
    worker,
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to spawn execution context: {0}")]
    Spawn(#[from] io::Error),
    #[error("execution context is gone")]
    Disconnected,
}

/// The host side of the isolation boundary: turns a compiled program into a
/// live execution context and hands back the channel its envelopes arrive on.
pub trait Boundary {
    type Ctx: Context;

    fn create_context(&self, program: &Program) -> Result<(Self::Ctx, Receiver<Envelope>), HostError>;
}

/// One live execution context. `terminate` releases the caller's side of the
/// transport; it does not forcibly stop in-flight work.
pub trait Context: Send + 'static {
    fn send(&self, message: InitMessage) -> Result<(), HostError>;
    fn terminate(&mut self);
}

/// Thread-backed boundary: one named OS thread per context, message passing
/// over channels, no shared memory with the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadBoundary;

pub struct ThreadContext {
    initial: Option<Sender<InitMessage>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Boundary for ThreadBoundary {
    type Ctx = ThreadContext;

    fn create_context(
        &self,
        program: &Program,
    ) -> Result<(ThreadContext, Receiver<Envelope>), HostError> {
        let (initial, initial_rx) = mpsc::channel::<InitMessage>();
        let (events, events_rx) = mpsc::channel::<Envelope>();
        let program = program.clone();
        let handle = thread::Builder::new()
            .name(format!("offload-{}", program.name()))
            .spawn(move || {
                // fire-and-forget transport: wait for the initial message,
                // run the task once, exit. a dropped sender before the
                // initial message means the caller gave up on us
                let Ok(message) = initial_rx.recv() else { return };
                worker::execute(&program, &message.params, &events)
            })?;
        Ok((
            ThreadContext {
                initial: Some(initial),
                worker: Some(handle),
            },
            events_rx,
        ))
    }
}

impl Context for ThreadContext {
    fn send(&self, message: InitMessage) -> Result<(), HostError> {
        let Some(initial) = &self.initial else {
            return Err(HostError::Disconnected);
        };
        initial.send(message).map_err(|_| HostError::Disconnected)
    }

    fn terminate(&mut self) {
        // threads cannot be killed: drop the transport and detach. a task
        // that never returns keeps its thread alive until process exit (the
        // core enforces no timeout)
        self.initial = None;
        drop(self.worker.take());
    }
}
