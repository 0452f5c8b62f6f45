//! Warden: sandboxed policy-as-code for dependency compliance.
//!
//! Organizations write small JavaScript policies (`packagePolicy`,
//! `projectStatus`, `pullRequestCheck`) that warden executes against
//! dependency and project data inside a V8 isolate. The engine is the
//! security boundary between a multi-tenant platform and code its tenants
//! wrote themselves: every execution carries a wall-clock budget, a fetch
//! call budget, an SSRF egress guard, and scripts must pass a multi-stage
//! validation pipeline before they may ever run in production.

pub mod audit;
pub mod context;
pub mod fetch;
pub mod guard;
pub mod harness;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod sandbox;
pub mod script;
pub mod validators;

pub use fetch::{FailingFetch, FetchHandler, GuardedFetch, StaticFetch};
pub use harness::ExecutionHarness;
pub use limits::ExecutionLimits;
pub use orchestrator::{OrgSettings, PolicyEvaluator, PolicyStore};
pub use pipeline::{StageOutcome, ValidationPipeline, ValidationResult};
pub use sandbox::{JsBackend, ScriptFailure, ScriptingBackend};
pub use script::{EntryPointKind, PolicyScript};
pub use validators::{PackagePolicyResult, ProjectStatusResult, ShapeError};
