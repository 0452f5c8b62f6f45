//! Execution harness - one invocation, one budget, one result.
//!
//! The harness is the single entry point the pipeline and the orchestrator
//! use to run a script. It serializes the context, attaches the invocation's
//! fetch capability and budget, and races the backend against a wall-clock
//! timer. The loser of the race is discarded, not cancelled: the V8 backend
//! happens to terminate overrunning scripts, but the harness does not depend
//! on that.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::fetch::FetchHandler;
use crate::limits::ExecutionLimits;
use crate::sandbox::{ScriptFailure, ScriptInvocation, ScriptingBackend};
use crate::script::EntryPointKind;

/// Extra wall-clock slack granted to the backend beyond the script budget,
/// so the backend's own timeout can fire and report first.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Runs policy scripts against a scripting backend with fixed limits.
#[derive(Clone)]
pub struct ExecutionHarness {
    backend: Arc<dyn ScriptingBackend>,
    limits: ExecutionLimits,
}

impl fmt::Debug for ExecutionHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHarness")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ExecutionHarness {
    /// Create a harness over the given backend with the given limits.
    pub fn new(backend: Arc<dyn ScriptingBackend>, limits: ExecutionLimits) -> Self {
        Self { backend, limits }
    }

    /// The limits applied to invocations that don't override the timeout.
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Check that `source` parses, without executing it.
    pub async fn check_syntax(&self, source: &str) -> Result<(), ScriptFailure> {
        self.backend.check_syntax(source).await
    }

    /// Execute `source`'s entry point for `kind` against `context` with the
    /// harness's default timeout.
    pub async fn execute<C: Serialize>(
        &self,
        source: &str,
        kind: EntryPointKind,
        context: &C,
        fetch: Arc<dyn FetchHandler>,
    ) -> Result<Value, ScriptFailure> {
        self.execute_with_timeout(source, kind, context, fetch, self.limits.timeout)
            .await
    }

    /// Execute with an explicit wall-clock budget (the validation pipeline
    /// uses a stricter one than production).
    pub async fn execute_with_timeout<C: Serialize>(
        &self,
        source: &str,
        kind: EntryPointKind,
        context: &C,
        fetch: Arc<dyn FetchHandler>,
        timeout: Duration,
    ) -> Result<Value, ScriptFailure> {
        let context = serde_json::to_value(context)
            .map_err(|e| ScriptFailure::Runtime(format!("context serialization: {e}")))?;

        let mut limits = self.limits.clone();
        limits.timeout = timeout;

        let invocation = ScriptInvocation {
            source: source.to_string(),
            kind,
            context,
            fetch,
            limits,
        };

        // Race the backend against the budget. If the backend's own timeout
        // never fires (a backend without preemption, a stuck native call),
        // the race still resolves and the in-flight result is discarded.
        match tokio::time::timeout(timeout + TIMEOUT_GRACE, self.backend.execute(invocation)).await
        {
            Ok(result) => result,
            Err(_) => Err(ScriptFailure::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::fetch::StaticFetch;

    /// Backend double that never completes, simulating a runtime with no
    /// preemption at all.
    #[derive(Debug)]
    struct HangingBackend;

    #[async_trait]
    impl ScriptingBackend for HangingBackend {
        async fn check_syntax(&self, _source: &str) -> Result<(), ScriptFailure> {
            Ok(())
        }

        async fn execute(&self, _invocation: ScriptInvocation) -> Result<Value, ScriptFailure> {
            futures::future::pending().await
        }
    }

    /// Backend double that echoes the context back, for plumbing tests.
    #[derive(Debug)]
    struct EchoBackend;

    #[async_trait]
    impl ScriptingBackend for EchoBackend {
        async fn check_syntax(&self, _source: &str) -> Result<(), ScriptFailure> {
            Ok(())
        }

        async fn execute(&self, invocation: ScriptInvocation) -> Result<Value, ScriptFailure> {
            Ok(invocation.context)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_harness_discards_a_hung_backend() {
        let harness = ExecutionHarness::new(Arc::new(HangingBackend), ExecutionLimits::default());
        let err = harness
            .execute_with_timeout(
                "function packagePolicy(ctx) {}",
                EntryPointKind::PackagePolicy,
                &serde_json::json!({}),
                Arc::new(StaticFetch::default()),
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ScriptFailure::Timeout(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_context_is_serialized_once_and_passed_through() {
        let harness = ExecutionHarness::new(Arc::new(EchoBackend), ExecutionLimits::default());
        let value = harness
            .execute(
                "x",
                EntryPointKind::PackagePolicy,
                &serde_json::json!({"dependency": {"name": "lodash"}}),
                Arc::new(StaticFetch::default()),
            )
            .await
            .unwrap();
        assert_eq!(value["dependency"]["name"], "lodash");
    }
}
