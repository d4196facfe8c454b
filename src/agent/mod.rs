//! Work unit contract and the single-unit executor.
//!
//! A unit pairs a `RoleAgent` (prompt in, parsed output out) with a
//! `Backend` that does the actual work. `AgentExecutor` enforces the role's
//! timeout and retry policy around each call and reports every outcome as a
//! `WorkResponse`.

pub mod backend;
pub mod executor;
pub mod hooks;
pub mod parse;
pub mod role;
pub mod unit;

pub use backend::{
    Backend, BackendOptions, BackendRegistry, CommandBackend, ProgressFn, RawResult,
};
pub use executor::{AgentExecutor, RoleAgent};
pub use hooks::HookSet;
pub use role::{Capabilities, ExecutionConfig, Role};
pub use unit::{FailureKind, Metrics, WorkRequest, WorkResponse};
