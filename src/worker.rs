use std::{
    any::Any,
    collections::BTreeMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, mpsc::Sender},
};

use crate::{
    compile::Program,
    protocol::{Envelope, Fault, Value},
};

/// A task body: statically compiled code invoked inside the worker, paired
/// with the source-text representation consumed by reflection and script
/// generation. The worker never evaluates the generated text; it runs `func`
/// with structured parameters.
pub type TaskFn = dyn Fn(&mut Scope, &[Value]) -> Result<Value, Fault> + Send + Sync;

pub struct Callable {
    source: String,
    func: Arc<TaskFn>,
}

impl Callable {
    pub fn new(
        source: impl Into<String>,
        func: impl Fn(&mut Scope, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: source.into(),
            func: Arc::new(func),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn invoke(&self, scope: &mut Scope, args: &[Value]) -> Result<Value, Fault> {
        (self.func)(scope, args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Per-execution worker state: the baked shared-callable snapshot, the
/// progress channel and the call-stack trace list. The Rust counterpart of
/// the helpers the preamble script bootstraps (`Task.result`, `Task.emit`,
/// `Task.functions`, `stackTrace`).
pub struct Scope {
    callables: Arc<BTreeMap<String, Arc<Callable>>>,
    events: Sender<Envelope>,
    stack_trace: Vec<String>,
}

impl Scope {
    pub(crate) fn new(
        callables: Arc<BTreeMap<String, Arc<Callable>>>,
        events: Sender<Envelope>,
    ) -> Self {
        Self {
            callables,
            events,
            stack_trace: Vec::new(),
        }
    }

    /// Posts a progress envelope. The terminal message is posted by the
    /// dispatcher after the task returns, never from here.
    pub fn emit(&self, value: Value) {
        // a send failure means the caller tore the transport down already;
        // there is nobody left to notify
        let _ = self.events.send(Envelope::Progress(value));
    }

    /// Result wrapper: pops the trace once if non-empty and hands the value
    /// back unchanged. Task bodies return `Ok(scope.result(value))` so the
    /// trace stays balanced across shared-callable calls. This is the only
    /// pop site; `call` pushes on entry and never pops on return.
    pub fn result(&mut self, value: Value) -> Value {
        if !self.stack_trace.is_empty() {
            self.stack_trace.pop();
        }
        value
    }

    /// Invokes a shared callable from the baked registry snapshot, recording
    /// its name on the trace on entry.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, Fault> {
        let Some(callable) = self.callables.get(name).cloned() else {
            return Err(self.fault(format!("unknown shared callable: {name}")));
        };
        self.stack_trace.push(name.into());
        callable.invoke(self, args)
    }

    /// Builds a fault carrying the current breadcrumb trace.
    pub fn fault(&self, message: impl Into<String>) -> Fault {
        Fault {
            message: message.into(),
            stack_trace: self.stack_trace.clone(),
        }
    }

    pub fn trace(&self) -> &[String] {
        &self.stack_trace
    }
}

/// Runs one task to completion inside its execution context and posts the
/// single terminal or fault envelope. Parameters are padded to exactly
/// `param_count` positions; missing positions read as null, matching the
/// dispatcher's `params[i]` indexing past the end of the list.
pub(crate) fn execute(program: &Program, params: &[Value], events: &Sender<Envelope>) {
    let mut scope = Scope::new(program.preamble().callables().clone(), events.clone());
    let args = (0..program.param_count())
        .map(|i| params.get(i).cloned().unwrap_or(Value::Null))
        .collect::<Vec<_>>();

    let name = program.name();
    tracing::trace!(%name, num_param = args.len(), "execute task");
    let outcome = catch_unwind(AssertUnwindSafe(|| program.callable().invoke(&mut scope, &args)));
    let envelope = match outcome {
        Ok(Ok(value)) => Envelope::Terminal(value),
        Ok(Err(fault)) => Envelope::Fault(fault),
        Err(panic) => Envelope::Fault(scope.fault(panic_message(&panic))),
    };
    let _ = events.send(envelope);
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).into()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use serde_json::json;

    use super::*;

    fn scope_with(entries: Vec<(&str, Callable)>) -> (Scope, mpsc::Receiver<Envelope>) {
        let callables = entries
            .into_iter()
            .map(|(name, callable)| (name.to_owned(), Arc::new(callable)))
            .collect::<BTreeMap<_, _>>();
        let (events, rx) = mpsc::channel();
        (Scope::new(Arc::new(callables), events), rx)
    }

    #[test]
    fn emit_posts_progress_envelopes_in_order() {
        let (scope, rx) = scope_with(Vec::new());
        scope.emit(json!(1));
        scope.emit(json!(2));
        assert_eq!(rx.try_recv().unwrap(), Envelope::Progress(json!(1)));
        assert_eq!(rx.try_recv().unwrap(), Envelope::Progress(json!(2)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn result_pops_trace_once_and_tolerates_empty_trace() {
        let (mut scope, _rx) = scope_with(Vec::new());
        assert_eq!(scope.result(json!(9)), json!(9));
        scope.stack_trace = vec!["a".into(), "b".into()];
        assert_eq!(scope.result(json!("v")), json!("v"));
        assert_eq!(scope.trace(), ["a"]);
    }

    #[test]
    fn nested_calls_grow_the_trace_without_popping() {
        // entry pushes are never matched by pops on normal return; only
        // result() pops. nested calls therefore leave both breadcrumbs behind
        let inner = Callable::new("inner() { 1 }", |_, _| Ok(json!(1)));
        let outer = Callable::new("outer() { inner() }", |scope, _| scope.call("inner", &[]));
        let (mut scope, _rx) = scope_with(vec![("inner", inner), ("outer", outer)]);

        assert_eq!(scope.call("outer", &[]).unwrap(), json!(1));
        assert_eq!(scope.trace(), ["outer", "inner"]);
    }

    #[test]
    fn execute_pads_short_parameter_lists_with_null() {
        use crate::{compile::Compiler, registry::Registry};

        let compiler = Compiler::new(Arc::new(Registry::new()));
        let probing = Callable::new("probe(a, b) { [a, b] }", |_, args| {
            Ok(json!([args[0].clone(), args[1].clone()]))
        });
        let program = compiler.compile("probe", Arc::new(probing), 2).unwrap();

        let (events, rx) = mpsc::channel();
        execute(&program, &[json!(7)], &events);
        assert_eq!(
            rx.try_recv().unwrap(),
            Envelope::Terminal(json!([7, Value::Null]))
        );
    }

    #[test]
    fn execute_turns_a_panic_into_a_fault() {
        use crate::{compile::Compiler, registry::Registry};

        let compiler = Compiler::new(Arc::new(Registry::new()));
        let faulty = Callable::new("faulty() { throw }", |_, _| panic!("deliberate"));
        let program = compiler.compile("faulty", Arc::new(faulty), 0).unwrap();

        let (events, rx) = mpsc::channel();
        execute(&program, &[], &events);
        let Envelope::Fault(fault) = rx.try_recv().unwrap() else {
            panic!("expected a fault envelope");
        };
        assert_eq!(fault.message, "deliberate");
    }

    #[test]
    fn unknown_callable_faults_with_breadcrumbs() {
        let outer = Callable::new("outer() { missing() }", |scope, _| {
            scope.call("missing", &[])
        });
        let (mut scope, _rx) = scope_with(vec![("outer", outer)]);

        let fault = scope.call("outer", &[]).unwrap_err();
        assert!(fault.message.contains("missing"));
        assert_eq!(fault.stack_trace, ["outer"]);
    }
}
