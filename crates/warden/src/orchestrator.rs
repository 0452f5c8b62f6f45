//! Policy evaluation orchestrator.
//!
//! Loads organization context from an injected store, runs the harness once
//! per dependency for package checks and once per project/PR for status
//! checks, and persists the typed results. Every failure inside the sandbox
//! degrades to a safe default - deny for package policy, the organization's
//! fallback status for status checks - and is recorded for operators
//! separately from the author-facing validation messages.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::{
    DependencyContext, PackagePolicyContext, ProjectStatusContext, PullRequestContext, TierContext,
};
use crate::fetch::FetchHandler;
use crate::harness::ExecutionHarness;
use crate::pipeline::{ValidationPipeline, ValidationResult};
use crate::script::{EntryPointKind, PolicyScript};
use crate::validators::{
    PackagePolicyResult, ProjectStatusResult, validate_package_result, validate_status_result,
};

/// Error raised by a [`PolicyStore`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("policy store error: {0}")]
pub struct StoreError(pub String);

/// Organization-level evaluation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSettings {
    /// Status names a `projectStatus`/`pullRequestCheck` result may use
    pub status_names: Vec<String>,
    /// The fail-closed status assigned when evaluation cannot complete
    pub fallback_status: String,
}

/// The decision and operator-facing failure detail for one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEvaluation {
    /// `name@version` of the evaluated dependency
    pub dependency: String,
    /// The (possibly fail-closed) decision
    pub result: PackagePolicyResult,
    /// The underlying failure when the decision was fail-closed
    pub failure: Option<String>,
}

/// Data-access handle the orchestrator is constructed with.
///
/// Implementations live outside the crate; nothing behind this trait is
/// ever reachable from inside the sandbox.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// The currently active script of `kind` for `org`, if any.
    async fn active_script(
        &self,
        org: &str,
        kind: EntryPointKind,
    ) -> Result<Option<PolicyScript>, StoreError>;

    /// Evaluation settings for `org`.
    async fn org_settings(&self, org: &str) -> Result<OrgSettings, StoreError>;

    /// Mark a script revision as the active one for its kind.
    async fn mark_active(&self, org: &str, script_id: &str) -> Result<(), StoreError>;

    /// Persist per-dependency package-policy outcomes.
    async fn record_package_results(
        &self,
        org: &str,
        results: &[DependencyEvaluation],
    ) -> Result<(), StoreError>;

    /// Persist a project or PR status outcome.
    async fn record_status_result(
        &self,
        org: &str,
        kind: EntryPointKind,
        result: &ProjectStatusResult,
    ) -> Result<(), StoreError>;
}

/// Errors the orchestrator surfaces to its caller.
///
/// Script failures never appear here - they are converted to fail-closed
/// results. What remains is missing configuration and store trouble.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No active script of the requested kind exists for the organization.
    #[error("no active {kind} script for organization `{org}`")]
    NoActiveScript {
        /// The organization queried.
        org: String,
        /// The kind queried.
        kind: EntryPointKind,
    },
    /// A script failed validation and therefore cannot be activated.
    #[error("script `{script_id}` failed validation at the {stage} stage: {message}")]
    NotActivatable {
        /// The rejected revision.
        script_id: String,
        /// First failing pipeline stage.
        stage: String,
        /// The stage's failure message.
        message: String,
    },
}

/// Evaluates activated policy scripts against live contexts.
#[derive(Clone)]
pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    harness: ExecutionHarness,
    fetch: Arc<dyn FetchHandler>,
}

impl fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEvaluator").finish_non_exhaustive()
    }
}

impl PolicyEvaluator {
    /// Create an evaluator over an injected store, harness and production
    /// fetch handler.
    pub fn new(
        store: Arc<dyn PolicyStore>,
        harness: ExecutionHarness,
        fetch: Arc<dyn FetchHandler>,
    ) -> Self {
        Self {
            store,
            harness,
            fetch,
        }
    }

    /// Validate a draft script for an organization - the only surface an
    /// author interacts with before activation.
    pub async fn validate(
        &self,
        source: &str,
        kind: EntryPointKind,
        org: &str,
    ) -> Result<ValidationResult, EvaluationError> {
        let mut pipeline = ValidationPipeline::new(self.harness.clone());
        if kind.is_status_kind() {
            let settings = self.store.org_settings(org).await?;
            pipeline = pipeline.with_status_names(settings.status_names);
        }
        Ok(pipeline.validate(source, kind).await)
    }

    /// Activate a script revision, enforcing the pipeline gate: a script
    /// whose validation did not fully pass may never run in production.
    pub async fn activate(
        &self,
        script: &PolicyScript,
        validation: &ValidationResult,
    ) -> Result<(), EvaluationError> {
        if !validation.all_passed {
            let (stage, message) = validation
                .first_failure()
                .map(|(stage, message)| (stage.to_string(), message.to_string()))
                .unwrap_or_else(|| ("unknown".to_string(), "validation incomplete".to_string()));
            return Err(EvaluationError::NotActivatable {
                script_id: script.id.clone(),
                stage,
                message,
            });
        }
        self.store.mark_active(&script.org, &script.id).await?;
        Ok(())
    }

    /// Evaluate the organization's package policy once per dependency.
    ///
    /// Invocations run concurrently; each gets its own fetch budget, so
    /// none can starve another's. Failures fail closed per dependency.
    pub async fn evaluate_package_policies(
        &self,
        org: &str,
        tier: &TierContext,
        dependencies: &[DependencyContext],
    ) -> Result<Vec<DependencyEvaluation>, EvaluationError> {
        let script = self
            .store
            .active_script(org, EntryPointKind::PackagePolicy)
            .await?
            .ok_or_else(|| EvaluationError::NoActiveScript {
                org: org.to_string(),
                kind: EntryPointKind::PackagePolicy,
            })?;

        let evaluations = futures::future::join_all(
            dependencies
                .iter()
                .map(|dependency| self.evaluate_one_package(&script, dependency, tier)),
        )
        .await;

        self.store.record_package_results(org, &evaluations).await?;
        Ok(evaluations)
    }

    async fn evaluate_one_package(
        &self,
        script: &PolicyScript,
        dependency: &DependencyContext,
        tier: &TierContext,
    ) -> DependencyEvaluation {
        let name = format!("{}@{}", dependency.name, dependency.version);
        let context = PackagePolicyContext {
            dependency: dependency.clone(),
            tier: tier.clone(),
        };

        let outcome = self
            .run_validated(
                &script.source,
                EntryPointKind::PackagePolicy,
                &context,
                |raw| validate_package_result(raw).map_err(|e| e.to_string()),
            )
            .await;

        match outcome {
            Ok(result) => DependencyEvaluation {
                dependency: name,
                result,
                failure: None,
            },
            Err(failure) => {
                tracing::warn!(
                    target: "warden::evaluation",
                    org = %script.org,
                    script = %script.id,
                    dependency = %name,
                    error = %failure,
                    "package policy failed, denying"
                );
                DependencyEvaluation {
                    dependency: name,
                    result: PackagePolicyResult::denied(format!(
                        "policy execution failed: {failure}"
                    )),
                    failure: Some(failure),
                }
            }
        }
    }

    /// Evaluate the organization's project-status policy.
    pub async fn evaluate_project_status(
        &self,
        org: &str,
        context: &ProjectStatusContext,
    ) -> Result<ProjectStatusResult, EvaluationError> {
        let context = serde_json::to_value(context)
            .map_err(|e| StoreError(format!("context serialization: {e}")))?;
        self.evaluate_status_kind(org, EntryPointKind::ProjectStatus, context)
            .await
    }

    /// Evaluate the organization's pull-request policy.
    pub async fn evaluate_pull_request(
        &self,
        org: &str,
        context: &PullRequestContext,
    ) -> Result<ProjectStatusResult, EvaluationError> {
        let context = serde_json::to_value(context)
            .map_err(|e| StoreError(format!("context serialization: {e}")))?;
        self.evaluate_status_kind(org, EntryPointKind::PullRequestCheck, context)
            .await
    }

    async fn evaluate_status_kind(
        &self,
        org: &str,
        kind: EntryPointKind,
        context: Value,
    ) -> Result<ProjectStatusResult, EvaluationError> {
        let script = self
            .store
            .active_script(org, kind)
            .await?
            .ok_or_else(|| EvaluationError::NoActiveScript {
                org: org.to_string(),
                kind,
            })?;
        let settings = self.store.org_settings(org).await?;

        let outcome = self
            .run_validated(&script.source, kind, &context, |raw| {
                let result = validate_status_result(raw).map_err(|e| e.to_string())?;
                // An unconfigured status name is an execution failure, not
                // a new status.
                if !settings.status_names.contains(&result.status) {
                    return Err(format!(
                        "script returned unconfigured status `{}`",
                        result.status
                    ));
                }
                Ok(result)
            })
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(failure) => {
                tracing::warn!(
                    target: "warden::evaluation",
                    org = %org,
                    script = %script.id,
                    kind = %kind,
                    error = %failure,
                    "status policy failed, assigning fallback status"
                );
                ProjectStatusResult::fallback(
                    settings.fallback_status.clone(),
                    format!("policy execution failed: {failure}"),
                )
            }
        };

        self.store.record_status_result(org, kind, &result).await?;
        Ok(result)
    }

    async fn run_validated<C, T>(
        &self,
        source: &str,
        kind: EntryPointKind,
        context: &C,
        validate: impl FnOnce(&Value) -> Result<T, String>,
    ) -> Result<T, String>
    where
        C: Serialize,
    {
        let raw = self
            .harness
            .execute(source, kind, context, self.fetch.clone())
            .await
            .map_err(|e| e.to_string())?;
        validate(&raw)
    }
}
