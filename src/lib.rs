//! Offloads a computation and its parameters to an isolated execution
//! context, runs it to completion or failure, and relays the result and any
//! intermediate progress values back to the caller.
//!
//! A task is compiled into a self-contained [`Program`] (preamble, task
//! binding, dispatcher) and handed to a host [`Boundary`] that creates the
//! context and carries messages. Inbound messages are tagged [`Envelope`]s:
//! any number of progress values in the order the worker emitted them,
//! followed by exactly one terminal value or one fault notification.
//!
//! ```
//! use std::sync::{Arc, mpsc};
//!
//! use offload::{Callable, Compiler, Registry, Task};
//! use serde_json::json;
//!
//! let compiler = Compiler::new(Arc::new(Registry::new()));
//! let add = Callable::new("add(a, b) { a + b }", |scope, args| {
//!     let sum = args[0].as_i64().unwrap() + args[1].as_i64().unwrap();
//!     Ok(scope.result(json!(sum)))
//! });
//!
//! let (tx, rx) = mpsc::channel();
//! Task::create_named(&compiler, vec![json!(2), json!(3)], add, "add")
//!     .unwrap()
//!     .run(move |value, _envelope| tx.send(value).unwrap())
//!     .unwrap();
//! assert_eq!(rx.recv().unwrap(), json!(5));
//! ```

pub mod compile;
pub mod host;
pub mod protocol;
pub mod reflect;
pub mod registry;
pub mod task;
pub mod worker;

pub use compile::{CompileError, Compiler, Preamble, Program};
pub use host::{Boundary, Context, HostError, ThreadBoundary, ThreadContext};
pub use protocol::{Envelope, Fault, InitMessage, Value};
pub use registry::Registry;
pub use task::{ANONYMOUS_TASK, Running, Task};
pub use worker::{Callable, Scope, TaskFn};
