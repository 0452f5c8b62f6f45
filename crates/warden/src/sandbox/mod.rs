//! Scripting backends - the pluggable isolation layer.
//!
//! The rest of the engine is written against [`ScriptingBackend`] only, so
//! the isolation mechanism (V8 isolate, WASM sandbox, subprocess runtime)
//! is swappable without touching validators or the validation pipeline.

mod js;

pub use js::JsBackend;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::fetch::FetchHandler;
use crate::limits::ExecutionLimits;
use crate::script::EntryPointKind;

/// Ways a script invocation can fail.
///
/// Every variant is a value, never a panic: nothing a script does may
/// escape the backend as an unhandled error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptFailure {
    /// The script body does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The required entry point is not defined as a function.
    #[error("entry point `{0}` is not defined as a function")]
    MissingEntryPoint(String),
    /// The script threw during execution; the thrown message is captured.
    #[error("script error: {0}")]
    Runtime(String),
    /// Execution exceeded its wall-clock budget. The in-flight script may
    /// keep running for a bounded grace period, but its result is discarded.
    #[error("execution exceeded the {}ms budget", .0.as_millis())]
    Timeout(Duration),
    /// The script exhausted the isolate's heap limit.
    #[error("memory limit exceeded")]
    MemoryLimit,
    /// The script's serialized result is larger than permitted.
    #[error("script result exceeds {max} bytes")]
    OutputTooLarge {
        /// The configured ceiling.
        max: usize,
    },
}

/// Everything one script invocation needs, crossed by value.
pub struct ScriptInvocation {
    /// The user-submitted script body
    pub source: String,
    /// Which entry point to invoke
    pub kind: EntryPointKind,
    /// The context object passed as the entry point's sole argument
    pub context: Value,
    /// The network capability for this invocation
    pub fetch: Arc<dyn FetchHandler>,
    /// Resource limits for this invocation
    pub limits: ExecutionLimits,
}

impl fmt::Debug for ScriptInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptInvocation")
            .field("kind", &self.kind)
            .field("source_len", &self.source.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// A sandboxed script runtime.
#[async_trait]
pub trait ScriptingBackend: Send + Sync {
    /// Check that `source` parses, without executing any of it.
    async fn check_syntax(&self, source: &str) -> Result<(), ScriptFailure>;

    /// Run one invocation to completion and return the raw value the
    /// script produced. Fresh isolation per call: no state survives
    /// between invocations.
    async fn execute(&self, invocation: ScriptInvocation) -> Result<Value, ScriptFailure>;
}
