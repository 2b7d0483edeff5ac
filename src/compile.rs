use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::{
    reflect::{self, ReflectError},
    registry::Registry,
    worker::Callable,
};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("task `{0}` is not callable")]
    NotCallable(String),
    #[error("{0}")]
    Reflect(#[from] ReflectError),
    #[error("shared callable `{0}` is not reflectable: {1}")]
    SharedCallable(String, ReflectError),
}

/// The cached preamble segment: the generated bootstrap text plus the
/// registry snapshot it was baked from. Workers look shared callables up in
/// the snapshot, so execution always matches the baked text even after the
/// registry mutates.
#[derive(Debug)]
pub struct Preamble {
    text: String,
    callables: Arc<BTreeMap<String, Arc<Callable>>>,
}

impl Preamble {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn callables(&self) -> &Arc<BTreeMap<String, Arc<Callable>>> {
        &self.callables
    }
}

/// A compiled task: one opaque, self-contained program. The three text
/// segments (preamble, task binding, dispatcher) are concatenated in fixed
/// order; alongside the text the program carries everything a worker needs to
/// run without reconstructing code from it.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    text: Arc<str>,
    param_count: usize,
    callable: Arc<Callable>,
    preamble: Arc<Preamble>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub(crate) fn callable(&self) -> &Arc<Callable> {
        &self.callable
    }

    pub(crate) fn preamble(&self) -> &Arc<Preamble> {
        &self.preamble
    }
}

/// Assembles programs from a registry. The preamble is baked once and cached:
/// first compile wins, later registry mutations are invisible to compiled
/// programs until `invalidate` is called. The mutex also serializes the race
/// of two tasks triggering the very first bake concurrently.
pub struct Compiler {
    registry: Arc<Registry>,
    preamble: Mutex<Option<Arc<Preamble>>>,
}

impl Compiler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            preamble: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The memoized preamble segment, baking it on first use.
    pub fn preamble(&self) -> Result<Arc<Preamble>, CompileError> {
        let mut slot = self.preamble.lock().expect("preamble cache lock");
        if let Some(preamble) = &*slot {
            return Ok(preamble.clone());
        }
        let preamble = Arc::new(self.bake_preamble()?);
        *slot = Some(preamble.clone());
        Ok(preamble)
    }

    /// Drops the cached preamble so the next compile re-bakes it from the
    /// current registry contents.
    pub fn invalidate(&self) {
        *self.preamble.lock().expect("preamble cache lock") = None;
    }

    /// Compiles one task instance. Deterministic given identical inputs and
    /// cache state.
    pub fn compile(
        &self,
        name: &str,
        callable: Arc<Callable>,
        param_count: usize,
    ) -> Result<Program, CompileError> {
        let preamble = self.preamble()?;
        let binding = self.task_binding(name, &callable)?;
        let dispatcher = self.dispatcher(name, param_count);
        let text = format!("{}{binding}\n{dispatcher}", preamble.text());
        tracing::debug!(%name, num_param = param_count, "compiled task program");
        Ok(Program {
            name: name.into(),
            text: text.into(),
            param_count,
            callable,
            preamble,
        })
    }

    /// Generates the worker bootstrap: the result-wrapper helper, the emit
    /// helper and the shared-callable block, mirrored one to one by the Rust
    /// worker runtime (`worker::Scope`).
    fn bake_preamble(&self) -> Result<Preamble, CompileError> {
        let callables = self.registry.snapshot();
        let mut block = String::from("{");
        for (i, (name, callable)) in callables.iter().enumerate() {
            if i > 0 {
                block.push_str(", ");
            }
            block.push_str(name);
            block.push(':');
            let synthesized = synthesize(name, callable)
                .map_err(|err| CompileError::SharedCallable(name.clone(), err))?;
            block.push_str(&synthesized);
        }
        block.push('}');

        let text = format!(
            "var Task = {{}};\n\
             var stackTrace = [];\n\
             var _self = self;\n\
             Task.result = function(val){{ if (stackTrace.length > 0) {{ stackTrace.pop(); }} return val; }};\n\
             Task.emit = function(val){{ _self.postMessage({{ kind: 'progress', payload: val }}); }};\n\
             Task.functions = {block};\n"
        );
        Ok(Preamble {
            text,
            callables: Arc::new(callables),
        })
    }

    /// The task-binding segment: the user's callable declared under `name`.
    pub fn task_binding(&self, name: &str, callable: &Callable) -> Result<String, CompileError> {
        // fail fast before splicing an unreflectable callable into a program
        reflect::signature_of(callable)?;
        reflect::body_of(callable)?;
        Ok(format!("var {name} = {};", callable.source()))
    }

    /// The dispatcher segment: a fault-handler stub (kept as a hook point)
    /// and the inbound-message handler that reads the parameter list, invokes
    /// the bound task positionally and posts the terminal envelope.
    pub fn dispatcher(&self, name: &str, param_count: usize) -> String {
        let params = inject_params(param_count);
        format!(
            "var _self = self;\n\
             _self.onerror = function(err){{}};\n\
             _self.onmessage = function(ev){{ \
             var params = ev.data.params; \
             var result = {name}({params}); \
             _self.postMessage({{ kind: 'terminal', payload: result }}); }};\n"
        )
    }
}

/// Re-synthesizes a shared callable for the preamble block: its signature,
/// a statement pushing its name onto the call-stack trace, its body, the
/// trailing trace statement and the closing delimiter.
fn synthesize(name: &str, callable: &Callable) -> Result<String, ReflectError> {
    let signature = reflect::signature_of(callable)?;
    let body = reflect::body_of(callable)?;
    Ok(format!(
        "{signature}{}{body}{}}}",
        trace_push_stmt(name),
        trace_pop_stmt()
    ))
}

// first statement inserted into every synthesized shared callable
fn trace_push_stmt(name: &str) -> String {
    format!("stackTrace.push('{name}');")
}

// last statement inserted into every synthesized shared callable. empty on
// purpose: nothing pops the trace on normal return, only the result helper
// does. the asymmetry is long-standing observable behavior (breadcrumbs
// survive for fault reports) and is covered by tests before anyone changes it
fn trace_pop_stmt() -> &'static str {
    ""
}

/// `params[0], params[1], ...` up to `count` positions.
fn inject_params(count: usize) -> String {
    (0..count)
        .map(|i| format!("params[{i}]"))
        .collect::<Vec<_>>()
        .join(", ")
}
