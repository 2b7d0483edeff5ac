use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque value passed between caller and worker: task parameters, progress
/// payloads and terminal results. Only argument-list style data, no cyclic
/// structures.
pub type Value = serde_json::Value;

/// Initial message sent to a fresh execution context: the positional
/// parameter list the dispatcher reads its `params[i]` references from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub params: Vec<Value>,
}

/// Every inbound message from a context carries an explicit discriminator.
/// Per execution: any number of `Progress` envelopes in program order,
/// followed by exactly one `Terminal` or one `Fault`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum Envelope {
    Progress(Value),
    Terminal(Value),
    Fault(Fault),
}

/// An uncaught failure inside an execution context. `stack_trace` holds the
/// breadcrumb names pushed by shared-callable entry (see `worker::Scope`).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Fault {
    pub message: String,
    pub stack_trace: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelopes_are_tagged() {
        let progress = serde_json::to_value(Envelope::Progress(json!(7))).unwrap();
        assert_eq!(progress, json!({ "kind": "progress", "payload": 7 }));

        // a terminal payload that itself looks like a progress envelope must
        // not be mistaken for one
        let tricky = json!({ "kind": "progress", "payload": 1 });
        let terminal = serde_json::to_value(Envelope::Terminal(tricky.clone())).unwrap();
        assert_eq!(terminal, json!({ "kind": "terminal", "payload": tricky }));
    }

    #[test]
    fn fault_round_trips_with_trace() {
        let fault = Fault {
            message: "boom".into(),
            stack_trace: vec!["outer".into(), "inner".into()],
        };
        let envelope = serde_json::to_value(Envelope::Fault(fault.clone())).unwrap();
        assert_eq!(
            serde_json::from_value::<Envelope>(envelope).unwrap(),
            Envelope::Fault(fault)
        );
    }
}
