//! Contract instance bookkeeping: identity, logs, errors, cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use deno_core::v8;

use crate::ledger::{LedgerHost, SharedLedgerContext};

/// The only engine kind this build supports.
pub const ENGINE_JS: i32 = 0;

/// Cap on the per-instance log ring; oldest lines are dropped first.
pub const MAX_LOG_LINES: usize = 100;

/// Process-wide id seed. `fetch_add` keeps ids unique and strictly
/// increasing for the lifetime of the process.
static CONTRACT_ID_SEED: AtomicI64 = AtomicI64::new(0);

/// Input to one contract invocation.
#[derive(Clone)]
pub struct ContractParameter {
    /// UTF-8 contract source.
    pub code: String,
    /// Opaque input handed to the entry function, typically JSON.
    pub input: String,
    pub sender: String,
    pub this_address: String,
    /// Index of the triggering operation within the enclosing transaction.
    pub ope_index: i32,
    /// Triggering transaction as JSON text.
    pub trigger_tx: String,
    /// Consensus value / header as JSON text.
    pub consensus_value: String,
    pub ledger_context: Option<SharedLedgerContext>,
    pub ledger: Option<Arc<dyn LedgerHost>>,
}

impl Default for ContractParameter {
    fn default() -> Self {
        ContractParameter {
            code: String::new(),
            input: String::new(),
            sender: String::new(),
            this_address: String::new(),
            ope_index: -1,
            trigger_tx: "{}".to_string(),
            consensus_value: "{}".to_string(),
            ledger_context: None,
            ledger: None,
        }
    }
}

impl ContractParameter {
    /// Parameter for a syntax check: empty globals, no ledger wiring.
    pub fn for_source_check(code: impl Into<String>) -> Self {
        ContractParameter {
            code: code.into(),
            ope_index: 0,
            ..Default::default()
        }
    }
}

/// One live contract invocation.
///
/// The instance is shared between the running worker, the manager registry
/// and any thread that wants to cancel it or observe its logs, so the
/// mutable pieces sit behind locks.
pub struct Contract {
    id: i64,
    readonly: bool,
    parameter: ContractParameter,
    logs: Mutex<VecDeque<String>>,
    error_msg: Mutex<String>,
    isolate: Mutex<Option<v8::IsolateHandle>>,
    cancelled: AtomicBool,
    tx_do_count: AtomicU32,
}

impl Contract {
    pub fn new(readonly: bool, parameter: ContractParameter) -> Arc<Self> {
        Arc::new(Contract {
            id: CONTRACT_ID_SEED.fetch_add(1, Ordering::SeqCst),
            readonly,
            parameter,
            logs: Mutex::new(VecDeque::new()),
            error_msg: Mutex::new(String::new()),
            isolate: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            tx_do_count: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn parameter(&self) -> &ContractParameter {
        &self.parameter
    }

    /// Append one line to the log ring, evicting the oldest past the cap.
    pub fn add_log(&self, line: impl Into<String>) {
        let mut logs = self.logs.lock().unwrap();
        logs.push_back(line.into());
        if logs.len() > MAX_LOG_LINES {
            logs.pop_front();
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().iter().cloned().collect()
    }

    pub fn error_msg(&self) -> String {
        self.error_msg.lock().unwrap().clone()
    }

    pub(crate) fn set_error_msg(&self, message: impl Into<String>) {
        *self.error_msg.lock().unwrap() = message.into();
    }

    /// Number of transactions this invocation has submitted successfully.
    pub fn tx_do_count(&self) -> u32 {
        self.tx_do_count.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_tx_do_count(&self) {
        self.tx_do_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Request termination. Safe from any thread and at any point of the
    /// lifecycle: before the isolate exists the flag alone aborts the run,
    /// after it is gone the terminate request is a no-op.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.isolate.lock().unwrap().as_ref() {
            handle.terminate_execution();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn bind_isolate(&self, handle: v8::IsolateHandle) {
        let mut slot = self.isolate.lock().unwrap();
        *slot = Some(handle);
        if self.cancelled.load(Ordering::SeqCst) {
            if let Some(handle) = slot.as_ref() {
                handle.terminate_execution();
            }
        }
    }

    pub(crate) fn release_isolate(&self) {
        *self.isolate.lock().unwrap() = None;
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_strictly_increasing() {
        let ids: Vec<i64> = (0..64)
            .map(|_| Contract::new(false, ContractParameter::default()).id())
            .collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn log_ring_keeps_only_the_newest_lines() {
        let contract = Contract::new(false, ContractParameter::default());
        for i in 0..150 {
            contract.add_log(format!("line {i}"));
        }
        let logs = contract.logs();
        assert_eq!(logs.len(), MAX_LOG_LINES);
        assert_eq!(logs.first().map(String::as_str), Some("line 50"));
        assert_eq!(logs.last().map(String::as_str), Some("line 149"));
    }

    #[test]
    fn cancel_before_isolate_binding_sets_the_flag() {
        let contract = Contract::new(true, ContractParameter::default());
        assert!(!contract.is_cancelled());
        assert!(contract.cancel());
        assert!(contract.is_cancelled());
    }
}
