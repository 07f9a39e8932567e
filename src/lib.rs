//! Sandboxed JavaScript smart-contract runtime for a blockchain ledger.
//!
//! The crate compiles and runs user-supplied contract code in a fresh V8
//! isolate per invocation, exposes a fixed set of host callbacks for ledger
//! reads and writes, and folds the resulting logs, return values and state
//! changes back into the enclosing ledger transaction.
//!
//! Top-level modules:
//! - [`runtime`] — contract manager, engine binding, host callbacks,
//!   marshaling and library loading.
//! - [`ledger`]  — the ledger-side working state and the narrow traits the
//!   runtime consumes, plus an in-memory reference ledger.
//! - [`protocol`] — ledger message types and their JSON mapping.
//! - [`cli`]     — the `chainscript` command-line tool.

use thiserror::Error;

pub mod cli;
pub mod ledger;
pub mod protocol;
pub mod runtime;

pub use ledger::{LedgerContext, MemoryLedger};
pub use runtime::contract::{Contract, ContractParameter, ENGINE_JS};
pub use runtime::manager::ContractManager;
pub use runtime::report::ExceptionReport;
pub use runtime::vm::CheckStrictness;

/// Convenience alias used across the crate.
pub type Result<T> = anyhow::Result<T>;

/// Failure modes that abort a contract invocation.
///
/// Callback-level failures (bad arguments, missing accounts, writes from a
/// readonly context, rejected transactions) never appear here: they are
/// logged host-side and the contract observes the boolean `false`.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The requested engine kind is not supported by this build.
    #[error("contract engine type ({0}) not supported")]
    UnsupportedEngine(i32),

    /// User source failed to compile.
    #[error("contract compile failed: {0}")]
    Compile(ExceptionReport),

    /// An exception escaped the script while running it or calling its entry.
    #[error("contract runtime exception: {0}")]
    Runtime(ExceptionReport),

    /// The entry function is not defined or is not callable.
    #[error("contract entry `{0}` missing or not a function")]
    EntryMissing(&'static str),

    /// The determinism scrub itself failed, which should not happen.
    #[error("determinism scrub failed: {0}")]
    Scrub(ExceptionReport),

    /// The isolate was terminated from another thread.
    #[error("contract execution cancelled")]
    Cancelled,

    /// The engine raised while stringifying a script value.
    #[error("marshal failed: {0}")]
    Marshal(String),

    /// A contract parameter (trigger transaction, consensus value) was not
    /// valid JSON.
    #[error("invalid contract parameter: {0}")]
    Parameter(String),

    /// Host-side binding failure outside user code.
    #[error("script engine internal error: {0}")]
    Internal(String),
}

impl ContractError {
    /// Stable kind tag, useful for matching without formatting.
    pub fn kind(&self) -> &'static str {
        match self {
            ContractError::UnsupportedEngine(_) => "unsupported_engine",
            ContractError::Compile(_) => "compile",
            ContractError::Runtime(_) => "runtime",
            ContractError::EntryMissing(_) => "entry_missing",
            ContractError::Scrub(_) => "scrub",
            ContractError::Cancelled => "cancelled",
            ContractError::Marshal(_) => "marshal",
            ContractError::Parameter(_) => "parameter",
            ContractError::Internal(_) => "internal",
        }
    }

    /// The machine-readable error artifact pushed onto the ledger context
    /// for failed queries.
    pub fn report_json(&self) -> serde_json::Value {
        match self {
            ContractError::Compile(report)
            | ContractError::Runtime(report)
            | ContractError::Scrub(report) => report.to_json(),
            other => serde_json::json!({ "exception": other.to_string() }),
        }
    }
}
