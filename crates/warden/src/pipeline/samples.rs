//! Fixed sample contexts the validation pipeline executes scripts against.
//!
//! One realistic sample per entry-point kind. These are deliberately
//! ordinary: a clean dependency, a small project with one prior denial, a
//! PR adding a dependency. Validation checks shape, not policy judgement.

use serde_json::Value;

use crate::context::{
    DependencyContext, DependencySummary, PackagePolicyContext, ProjectInfo, ProjectStatusContext,
    PullRequestContext, PullRequestInfo, SignalStatus, TierContext,
};
use crate::script::EntryPointKind;
use crate::validators::PackagePolicyResult;

fn sample_tier() -> TierContext {
    TierContext {
        name: "internal".to_string(),
        rank: 2,
        multiplier: 1.0,
    }
}

fn sample_dependency() -> DependencyContext {
    DependencyContext {
        name: "left-pad".to_string(),
        version: "1.3.0".to_string(),
        license: "MIT".to_string(),
        health_score: 72.0,
        maintenance_score: 4.5,
        popularity_score: 9.1,
        malicious_indicator: None,
        slsa_level: 1,
        registry_integrity: SignalStatus::Pass,
        install_script: SignalStatus::Warning,
        entropy: SignalStatus::Pass,
    }
}

fn sample_summaries() -> Vec<DependencySummary> {
    vec![
        DependencySummary {
            name: "left-pad".to_string(),
            version: "1.3.0".to_string(),
            added: false,
            policy_result: PackagePolicyResult {
                allowed: true,
                reasons: vec![],
            },
        },
        DependencySummary {
            name: "event-stream".to_string(),
            version: "3.3.6".to_string(),
            added: true,
            policy_result: PackagePolicyResult {
                allowed: false,
                reasons: vec!["malicious indicator from osv".to_string()],
            },
        },
    ]
}

/// The sample a `packagePolicy` script is validated against.
pub fn package_policy_sample() -> PackagePolicyContext {
    PackagePolicyContext {
        dependency: sample_dependency(),
        tier: sample_tier(),
    }
}

/// The sample a `projectStatus` script is validated against.
pub fn project_status_sample() -> ProjectStatusContext {
    ProjectStatusContext {
        project: ProjectInfo {
            name: "billing-service".to_string(),
            default_branch: "main".to_string(),
        },
        tier: sample_tier(),
        dependencies: sample_summaries(),
    }
}

/// The sample a `pullRequestCheck` script is validated against.
pub fn pull_request_sample() -> PullRequestContext {
    PullRequestContext {
        project: ProjectInfo {
            name: "billing-service".to_string(),
            default_branch: "main".to_string(),
        },
        pull_request: PullRequestInfo {
            number: 128,
            title: "bump dependencies".to_string(),
            branch: "deps/update".to_string(),
        },
        tier: sample_tier(),
        dependencies: sample_summaries(),
    }
}

/// The sample context for `kind`, as the JSON value handed to the harness.
pub fn sample_context(kind: EntryPointKind) -> Value {
    let value = match kind {
        EntryPointKind::PackagePolicy => serde_json::to_value(package_policy_sample()),
        EntryPointKind::ProjectStatus => serde_json::to_value(project_status_sample()),
        EntryPointKind::PullRequestCheck => serde_json::to_value(pull_request_sample()),
    };
    value.unwrap_or(Value::Null)
}
