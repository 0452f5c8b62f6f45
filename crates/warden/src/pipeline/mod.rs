//! The validation pipeline gating script activation.
//!
//! Four checks in strict order, each short-circuiting the rest on failure:
//! empty/size, syntax, shape against a fixed sample context, and fetch
//! resilience. A script may only be activated when `all_passed` is true;
//! that is the central safety invariant between authoring and production.

pub mod samples;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fetch::{FailingFetch, FetchHandler, StaticFetch};
use crate::harness::ExecutionHarness;
use crate::script::{EntryPointKind, MAX_SCRIPT_BYTES};
use crate::validators::{validate_package_result, validate_status_result};

/// Wall-clock budget for each validation execution, stricter than
/// production so a slow draft fails fast in the authoring UI.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "message")]
pub enum StageOutcome {
    /// The stage ran and passed.
    Passed,
    /// The stage ran and failed with an author-facing message.
    Failed(String),
    /// The stage did not run (an earlier stage failed, or the script never
    /// touches the network).
    Skipped,
}

impl StageOutcome {
    /// Whether this stage ran and passed.
    pub fn passed(&self) -> bool {
        matches!(self, StageOutcome::Passed)
    }

    /// Whether this stage ran and failed.
    pub fn failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }

    /// The failure message, if the stage failed.
    pub fn message(&self) -> Option<&str> {
        match self {
            StageOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// The verdict of the validation pipeline, surfaced verbatim to the script
/// author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Empty/size and parse check
    pub syntax: StageOutcome,
    /// Execution against the sample context plus the result validator
    pub shape: StageOutcome,
    /// Behavior under both a healthy and a failing network
    pub fetch_resilience: StageOutcome,
    /// Conjunction of every stage that ran; activation requires `true`
    pub all_passed: bool,
}

impl ValidationResult {
    fn new(syntax: StageOutcome, shape: StageOutcome, fetch_resilience: StageOutcome) -> Self {
        let all_passed = !syntax.failed()
            && !fetch_resilience.failed()
            && shape.passed();
        Self {
            syntax,
            shape,
            fetch_resilience,
            all_passed,
        }
    }

    fn syntax_failure(message: String) -> Self {
        Self::new(
            StageOutcome::Failed(message),
            StageOutcome::Skipped,
            StageOutcome::Skipped,
        )
    }

    /// The first failing stage and its message, if any stage failed.
    pub fn first_failure(&self) -> Option<(&'static str, &str)> {
        for (name, stage) in [
            ("syntax", &self.syntax),
            ("shape", &self.shape),
            ("fetchResilience", &self.fetch_resilience),
        ] {
            if let Some(message) = stage.message() {
                return Some((name, message));
            }
        }
        None
    }
}

/// The three-stage gate a script must pass before an organization may
/// activate it.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    harness: ExecutionHarness,
    status_names: Option<Vec<String>>,
    timeout: Duration,
}

impl ValidationPipeline {
    /// Create a pipeline over the given harness.
    pub fn new(harness: ExecutionHarness) -> Self {
        Self {
            harness,
            status_names: None,
            timeout: VALIDATION_TIMEOUT,
        }
    }

    /// Also require status results to name one of the organization's
    /// configured statuses, catching the mismatch at authoring time rather
    /// than as a production execution failure.
    pub fn with_status_names(mut self, names: Vec<String>) -> Self {
        self.status_names = Some(names);
        self
    }

    /// Run the full gate over `source`.
    pub async fn validate(&self, source: &str, kind: EntryPointKind) -> ValidationResult {
        // Stage 1: reject empty and oversize scripts before any execution.
        if source.trim().is_empty() {
            return ValidationResult::syntax_failure("script is empty".to_string());
        }
        if source.len() > MAX_SCRIPT_BYTES {
            return ValidationResult::syntax_failure(format!(
                "script is {} bytes, over the 50 KB limit",
                source.len()
            ));
        }

        // Stage 2: parse in isolation, no execution.
        if let Err(e) = self.harness.check_syntax(source).await {
            return ValidationResult::syntax_failure(e.to_string());
        }

        // Stage 3: one execution against the fixed sample, then the shape
        // validator for this kind.
        let sample = samples::sample_context(kind);
        if let Err(message) = self
            .run_once(source, kind, &sample, Arc::new(StaticFetch::default()))
            .await
        {
            return ValidationResult::new(
                StageOutcome::Passed,
                StageOutcome::Failed(message),
                StageOutcome::Skipped,
            );
        }

        // Stage 4: fetch resilience, only for scripts that reach for the
        // network. The textual pre-check is conservative: a false positive
        // just runs one extra harmless check.
        if !source.contains("fetch(") {
            return ValidationResult::new(
                StageOutcome::Passed,
                StageOutcome::Passed,
                StageOutcome::Skipped,
            );
        }

        let resilience = self.check_fetch_resilience(source, kind, &sample).await;
        ValidationResult::new(StageOutcome::Passed, StageOutcome::Passed, resilience)
    }

    async fn check_fetch_resilience(
        &self,
        source: &str,
        kind: EntryPointKind,
        sample: &Value,
    ) -> StageOutcome {
        // Both sub-runs must produce a validator-passing result: one where
        // every fetch succeeds, one where every fetch throws. Authors
        // routinely forget the second case and their policy would crash in
        // production the first time an upstream is unreachable.
        if let Err(message) = self
            .run_once(source, kind, sample, Arc::new(StaticFetch::default()))
            .await
        {
            return StageOutcome::Failed(format!(
                "policy failed while fetch was available: {message}"
            ));
        }
        if let Err(message) = self
            .run_once(source, kind, sample, Arc::new(FailingFetch))
            .await
        {
            return StageOutcome::Failed(format!(
                "policy does not handle fetch failures ({message}); wrap fetch calls in \
                 try/catch and return a fallback result"
            ));
        }
        StageOutcome::Passed
    }

    async fn run_once(
        &self,
        source: &str,
        kind: EntryPointKind,
        sample: &Value,
        fetch: Arc<dyn FetchHandler>,
    ) -> Result<(), String> {
        let raw = self
            .harness
            .execute_with_timeout(source, kind, sample, fetch, self.timeout)
            .await
            .map_err(|e| e.to_string())?;

        if kind.is_status_kind() {
            let result = validate_status_result(&raw).map_err(|e| e.to_string())?;
            if let Some(names) = &self.status_names
                && !names.contains(&result.status)
            {
                return Err(format!(
                    "`{}` is not a configured status name (configured: {})",
                    result.status,
                    names.join(", ")
                ));
            }
        } else {
            validate_package_result(&raw).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::limits::ExecutionLimits;
    use crate::sandbox::JsBackend;

    fn pipeline() -> ValidationPipeline {
        let harness =
            ExecutionHarness::new(Arc::new(JsBackend::default()), ExecutionLimits::validation());
        ValidationPipeline::new(harness)
    }

    #[tokio::test]
    async fn test_empty_script_fails_with_emptiness_message() {
        let result = pipeline().validate("", EntryPointKind::PackagePolicy).await;
        assert!(!result.all_passed);
        let (stage, message) = result.first_failure().unwrap();
        assert_eq!(stage, "syntax");
        assert!(message.contains("empty"));
    }

    #[tokio::test]
    async fn test_oversize_script_fails_with_limit_message() {
        let body = "x".repeat(51_000);
        let result = pipeline().validate(&body, EntryPointKind::PackagePolicy).await;
        assert!(!result.all_passed);
        let (_, message) = result.first_failure().unwrap();
        assert!(message.contains("50 KB"));
    }

    #[tokio::test]
    async fn test_broken_syntax_stops_the_pipeline() {
        let result = pipeline()
            .validate("function packagePolicy( {", EntryPointKind::PackagePolicy)
            .await;
        assert!(result.syntax.failed());
        assert_eq!(result.shape, StageOutcome::Skipped);
        assert_eq!(result.fetch_resilience, StageOutcome::Skipped);
        assert!(!result.all_passed);
    }

    #[tokio::test]
    async fn test_wrong_shape_fails_with_field_message() {
        let source = r#"
            function packagePolicy(ctx) {
                return { allowed: true, reasons: "fine" };
            }
        "#;
        let result = pipeline().validate(source, EntryPointKind::PackagePolicy).await;
        assert!(result.syntax.passed());
        assert!(result.shape.failed());
        assert!(result.shape.message().unwrap().contains("`reasons`"));
        assert!(!result.all_passed);
    }

    #[tokio::test]
    async fn test_clean_script_skips_resilience_and_passes() {
        let source = r#"
            function packagePolicy(ctx) {
                if (ctx.dependency.maliciousIndicator) {
                    return { allowed: false, reasons: ["Malicious"] };
                }
                return { allowed: true, reasons: [] };
            }
        "#;
        let result = pipeline().validate(source, EntryPointKind::PackagePolicy).await;
        assert!(result.all_passed);
        assert_eq!(result.fetch_resilience, StageOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unguarded_fetch_fails_resilience() {
        let source = r#"
            async function packagePolicy(ctx) {
                const res = await fetch("https://api.example.com/advisories");
                const body = await res.json();
                return { allowed: body.ok === true, reasons: [] };
            }
        "#;
        let result = pipeline().validate(source, EntryPointKind::PackagePolicy).await;
        assert!(result.syntax.passed());
        assert!(result.shape.passed());
        assert!(result.fetch_resilience.failed());
        let message = result.fetch_resilience.message().unwrap();
        assert!(message.contains("fallback"), "message: {message}");
        assert!(!result.all_passed);
    }

    #[tokio::test]
    async fn test_guarded_fetch_passes_resilience() {
        let source = r#"
            async function packagePolicy(ctx) {
                try {
                    const res = await fetch("https://api.example.com/advisories");
                    const body = await res.json();
                    return { allowed: body.ok === true, reasons: [] };
                } catch (e) {
                    return { allowed: false, reasons: ["advisory feed unreachable"] };
                }
            }
        "#;
        let result = pipeline().validate(source, EntryPointKind::PackagePolicy).await;
        assert!(result.all_passed, "result: {result:?}");
        assert!(result.fetch_resilience.passed());
    }

    #[tokio::test]
    async fn test_status_kind_validates_status_shape() {
        let source = r#"
            function projectStatus(ctx) {
                const denied = ctx.dependencies.filter(d => !d.policyResult.allowed);
                if (denied.length > 0) {
                    return { status: "non-compliant", violations: denied.map(d => d.name) };
                }
                return { status: "compliant", violations: [] };
            }
        "#;
        let result = pipeline().validate(source, EntryPointKind::ProjectStatus).await;
        assert!(result.all_passed, "result: {result:?}");
    }

    #[tokio::test]
    async fn test_unconfigured_status_name_is_caught_when_names_are_known() {
        let source = r#"
            function projectStatus(ctx) {
                return { status: "amazing", violations: [] };
            }
        "#;
        let result = pipeline()
            .with_status_names(vec!["compliant".to_string(), "non-compliant".to_string()])
            .validate(source, EntryPointKind::ProjectStatus)
            .await;
        assert!(result.shape.failed());
        assert!(result.shape.message().unwrap().contains("amazing"));
    }

    #[tokio::test]
    async fn test_validation_result_serializes_camel_case() {
        let result = ValidationResult::new(
            StageOutcome::Passed,
            StageOutcome::Failed("bad".to_string()),
            StageOutcome::Skipped,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["allPassed"], false);
        assert_eq!(json["fetchResilience"]["outcome"], "skipped");
        assert_eq!(json["shape"]["message"], "bad");
    }
}
