//! Read-only context objects passed into policy scripts.
//!
//! Everything here crosses the sandbox boundary by value: plain data, no
//! handles, no callbacks. Field names serialize as camelCase because scripts
//! address them directly (`ctx.dependency.maliciousIndicator`).

use serde::{Deserialize, Serialize};

use crate::validators::PackagePolicyResult;

/// Outcome of a supply-chain signal check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    /// Signal found nothing of note
    Pass,
    /// Signal found something worth a human look
    Warning,
    /// Signal found a concrete problem
    Fail,
}

/// A malicious-package indicator attached to a dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaliciousIndicator {
    /// Feed or analyzer that flagged the package
    pub source: String,
    /// Confidence in the flag, 0.0–1.0
    pub confidence: f64,
    /// Human-readable explanation
    pub reason: String,
}

/// Per-dependency data handed to `packagePolicy` scripts.
///
/// Health signals deliberately keep their source scales: `health_score` is
/// 0–100 while `maintenance_score` and `popularity_score` are 0–10. Scripts
/// must handle each field's own range; nothing is normalized here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyContext {
    /// Package name as published
    pub name: String,
    /// Resolved version
    pub version: String,
    /// Declared license expression, verbatim from the registry
    pub license: String,
    /// Aggregate health score, 0–100
    pub health_score: f64,
    /// Maintenance signal, 0–10
    pub maintenance_score: f64,
    /// Popularity signal, 0–10
    pub popularity_score: f64,
    /// Set when a malicious-package feed has flagged this version
    pub malicious_indicator: Option<MaliciousIndicator>,
    /// SLSA provenance level, 0–4
    pub slsa_level: u8,
    /// Registry-integrity check (published artifact matches source)
    pub registry_integrity: SignalStatus,
    /// Install-script analysis (lifecycle hooks doing suspicious work)
    pub install_script: SignalStatus,
    /// Entropy analysis (obfuscated or packed payloads)
    pub entropy: SignalStatus,
}

/// Sensitivity tier of the project under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierContext {
    /// Organization-chosen tier name
    pub name: String,
    /// Lower rank = more sensitive; crown-jewel tiers rank lowest
    pub rank: i32,
    /// Scales risk arithmetic done elsewhere; exposed so scripts can do
    /// their own weighting
    pub multiplier: f64,
}

/// Basic project identity for status and PR evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    /// Project name
    pub name: String,
    /// Default branch the dependency manifest was read from
    pub default_branch: String,
}

/// Pull-request identity for `pullRequestCheck` evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestInfo {
    /// PR number in the hosting system
    pub number: u64,
    /// PR title
    pub title: String,
    /// Source branch
    pub branch: String,
}

/// A dependency summary inside a project-level context, carrying the prior
/// package-policy decision made for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySummary {
    /// Package name
    pub name: String,
    /// Resolved version
    pub version: String,
    /// Whether this dependency was newly added (PR contexts)
    pub added: bool,
    /// The package-policy result previously computed for this dependency
    pub policy_result: PackagePolicyResult,
}

/// Context object for a `packagePolicy` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePolicyContext {
    /// The dependency under evaluation
    pub dependency: DependencyContext,
    /// The tier of the project that depends on it
    pub tier: TierContext,
}

/// Context object for a `projectStatus` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusContext {
    /// The project being evaluated
    pub project: ProjectInfo,
    /// The project's tier
    pub tier: TierContext,
    /// One summary per dependency, each with its prior policy result
    pub dependencies: Vec<DependencySummary>,
}

/// Context object for a `pullRequestCheck` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestContext {
    /// The project the PR targets
    pub project: ProjectInfo,
    /// The pull request itself
    pub pull_request: PullRequestInfo,
    /// The project's tier
    pub tier: TierContext,
    /// Dependencies touched by the PR, with prior policy results
    pub dependencies: Vec<DependencySummary>,
}
