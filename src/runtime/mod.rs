//! Contract execution sub-system.
//!
//! Sub-modules:
//! - [`manager`]   — Registry of running contracts; `execute` / `query` /
//!                   `cancel` / `source_code_check` entry points.
//! - [`vm`]        — Per-invocation engine binding: sandbox construction,
//!                   determinism scrubbing, compile/run, entry invocation.
//! - [`callbacks`] — Host-callback surface exposed to contract code.
//! - [`marshal`]   — Typed-envelope JSON ⇄ script-value marshaling.
//! - [`loader`]    — JS library loading for the `include` callback.
//! - [`contract`]  — Instance bookkeeping: ids, log ring, cancellation.
//! - [`report`]    — Exception reports for failed invocations.

pub mod contract;
pub mod loader;
pub mod manager;
pub mod marshal;
pub mod report;
pub mod vm;

mod callbacks;

// Top-level re-exports.
pub use contract::{Contract, ContractParameter, ENGINE_JS, MAX_LOG_LINES};
pub use manager::ContractManager;
pub use report::ExceptionReport;
pub use vm::CheckStrictness;
