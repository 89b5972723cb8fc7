// NOTE: Schema Crate Rationale
//
// Why a dedicated types crate (not types-per-crate)?
// - The event envelope is a stable external surface: the proxy emits it,
//   the ledger ingests it, the exporter reconstructs it. One definition
//   prevents the three from drifting.
// - Policy bundle specs are deserialized in the policy crate but also
//   referenced by the proxy (mode, policy info on every decision event);
//   keeping them here avoids a dependency cycle.
// - No I/O, no state: everything in this crate is serde data.

mod error;
pub mod event;
mod identity;
mod policy;

pub use error::{Error, Result};
pub use event::{
    ArgsPreview, CallInfo, CallRef, CallStatus, ErrorClass, ErrorDetail, Event, EventPayload,
    ResultPreview, RunStatus, RunSummary,
};
pub use identity::{Client, Env, RunInfo, SourceInfo, Workload};
pub use policy::{
    ArgsPredicate, BundleSpec, Decision, DecisionAction, Defaults, EffectSpec, Explain, Hint,
    MatchSpec, Mode, NumRange, PolicyInfo, RuleKind, RuleSpec, Scope, Selectors, Severity,
    WorkloadSelector,
};

/// Current event envelope version.
pub const EVENT_VERSION: u32 = 1;
