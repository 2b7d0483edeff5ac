use std::{
    fmt,
    sync::{Arc, mpsc::Receiver},
    thread,
};

use crate::{
    compile::{CompileError, Compiler, Program},
    host::{Boundary, Context, HostError, ThreadBoundary},
    protocol::{Envelope, Fault, InitMessage, Value},
    reflect,
    worker::Callable,
};

/// Name a task compiles under when the caller does not pick one.
pub const ANONYMOUS_TASK: &str = "task_anonymous";

type Listener = Box<dyn Fn(Value) + Send>;
type ErrHandler = Box<dyn Fn(Fault) + Send>;
type Completion = Box<dyn FnOnce(Value, Envelope) + Send>;

/// One task instance: the compiled program, its parameter list and the two
/// user callbacks. Compiled at creation, executed at most once — `run`
/// consumes the task, so re-running is impossible by construction.
pub struct Task {
    program: Program,
    params: Vec<Value>,
    listener: Listener,
    err_handler: ErrHandler,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("program", &self.program)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Compiles a task under the fixed anonymous name. Does not start it.
    pub fn create(
        compiler: &Compiler,
        params: Vec<Value>,
        callable: Callable,
    ) -> Result<Self, CompileError> {
        Self::create_named(compiler, params, callable, ANONYMOUS_TASK)
    }

    /// Compiles a task under `name`. Reflection failures surface here,
    /// synchronously: a task that cannot be compiled is a programming error,
    /// not a runtime fault.
    pub fn create_named(
        compiler: &Compiler,
        params: Vec<Value>,
        callable: Callable,
        name: &str,
    ) -> Result<Self, CompileError> {
        if !reflect::is_callable(&callable) {
            return Err(CompileError::NotCallable(name.into()));
        }
        let param_count = params.len();
        let program = compiler.compile(name, Arc::new(callable), param_count)?;
        Ok(Self {
            program,
            params,
            listener: Box::new(|_| {}),
            err_handler: Box::new(|_| {}),
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Sets the progress listener fired on every emitted value. May be called
    /// repeatedly before `run`; the last writer wins. Default: no-op.
    pub fn add_listener(mut self, cb: impl Fn(Value) + Send + 'static) -> Self {
        self.listener = Box::new(cb);
        self
    }

    /// Sets the handler fired on an uncaught worker fault. Last writer wins.
    /// Default: no-op — an unhandled worker fault never crashes the caller.
    pub fn error_handler(mut self, cb: impl Fn(Fault) + Send + 'static) -> Self {
        self.err_handler = Box::new(cb);
        self
    }

    /// Starts the task on the thread-backed boundary. Returns immediately;
    /// outcomes arrive later through the callbacks, in the order the worker
    /// sent them: any number of progress values, then exactly one of the
    /// completion callback or the error handler.
    pub fn run(self, cb: impl FnOnce(Value, Envelope) + Send + 'static) -> Result<Running, HostError> {
        self.run_on(&ThreadBoundary, cb)
    }

    /// Starts the task on an explicit boundary.
    pub fn run_on(
        self,
        boundary: &impl Boundary,
        cb: impl FnOnce(Value, Envelope) + Send + 'static,
    ) -> Result<Running, HostError> {
        let Self {
            program,
            params,
            listener,
            err_handler,
        } = self;
        let (context, events) = boundary.create_context(&program)?;
        context.send(InitMessage { params })?;
        tracing::debug!(name = %program.name(), "task started");

        let dispatch = thread::Builder::new()
            .name(format!("offload-dispatch-{}", program.name()))
            .spawn(move || dispatch(context, events, listener, err_handler, Box::new(cb)))?;
        Ok(Running { dispatch })
    }
}

/// Demultiplexes inbound envelopes until the single terminal or fault
/// arrives, then terminates the context and delivers the matching callback.
fn dispatch(
    mut context: impl Context,
    events: Receiver<Envelope>,
    listener: Listener,
    err_handler: ErrHandler,
    complete: Completion,
) {
    loop {
        match events.recv() {
            Ok(Envelope::Progress(value)) => listener(value),
            Ok(Envelope::Terminal(value)) => {
                context.terminate();
                complete(value.clone(), Envelope::Terminal(value));
                break;
            }
            Ok(Envelope::Fault(fault)) => {
                context.terminate();
                tracing::error!(%fault, "task faulted");
                err_handler(fault);
                break;
            }
            Err(_) => {
                // the context went away without a terminal message; surface
                // it as a fault rather than dropping the execution silently
                context.terminate();
                let fault = Fault {
                    message: "execution context disconnected before a terminal message".into(),
                    stack_trace: Vec::new(),
                };
                tracing::error!(%fault, "task faulted");
                err_handler(fault);
                break;
            }
        }
    }
}

/// Handle to a started task. Dropping it detaches; `join` waits until the
/// terminal or fault callback has been delivered.
#[derive(Debug)]
pub struct Running {
    dispatch: thread::JoinHandle<()>,
}

impl Running {
    pub fn join(self) {
        let _ = self.dispatch.join();
    }
}
