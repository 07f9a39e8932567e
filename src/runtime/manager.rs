//! Contract manager: registry and lifecycle of running contracts.
//!
//! The manager is the single entry point the ledger uses to run contract
//! code. It owns the registry of live instances (the cancellation index),
//! wires each invocation into the enclosing [`LedgerContext`] (contract-id
//! stack, drained logs, query return records), and offers watchdog
//! variants that bound an invocation's wall-clock time by cancelling it
//! from a second thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, warn};

use crate::runtime::contract::{Contract, ContractParameter, ENGINE_JS};
use crate::runtime::loader;
use crate::runtime::vm::{self, CheckStrictness};
use crate::{ContractError, Result};

static MANAGER: Lazy<ContractManager> = Lazy::new(|| ContractManager {
    contracts: Mutex::new(HashMap::new()),
});

/// Process-wide owner of running contract instances.
pub struct ContractManager {
    contracts: Mutex<HashMap<i64, Arc<Contract>>>,
}

impl ContractManager {
    pub fn instance() -> &'static ContractManager {
        &MANAGER
    }

    /// One-time engine setup: load the JS library directory. The V8
    /// platform itself is initialized once, lazily, by the embedder on
    /// first isolate creation.
    pub fn initialize(&self, jslib_dir: Option<&Path>) -> Result<usize> {
        let dir = jslib_dir
            .map(PathBuf::from)
            .unwrap_or_else(default_jslib_dir);
        loader::load_library_dir(&dir)
    }

    /// Syntax-only validation of contract source (optionally requiring a
    /// callable `main`, see [`CheckStrictness`]).
    pub fn source_code_check(
        &self,
        engine_type: i32,
        code: &str,
        strictness: CheckStrictness,
    ) -> Result<()> {
        require_engine(engine_type)?;
        let contract = Contract::new(false, ContractParameter::for_source_check(code));
        match vm::check_source(&contract, strictness) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("source check failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Run a contract in mutating mode, entry `main(input)`.
    pub fn execute(&self, engine_type: i32, parameter: ContractParameter) -> Result<()> {
        require_engine(engine_type)?;
        self.run_execute_registered(Contract::new(false, parameter))
    }

    /// Run a contract in readonly mode, entry `query(input)`.
    ///
    /// Returns the success flag together with the result object: a
    /// `result` array of marshaled values on success, an `error_desc_f`
    /// record on failure. The same object, plus `success`, is pushed onto
    /// the ledger context's return stack either way.
    pub fn query(&self, engine_type: i32, parameter: ContractParameter) -> (bool, JsonValue) {
        if let Err(err) = require_engine(engine_type) {
            return (false, json!({ "error_desc_f": { "exception": err.to_string() } }));
        }
        self.run_query_registered(Contract::new(true, parameter))
    }

    /// As [`execute`](Self::execute), but run on a worker thread and
    /// cancelled if it outlives `timeout`.
    pub fn execute_with_timeout(
        &self,
        engine_type: i32,
        parameter: ContractParameter,
        timeout: Duration,
    ) -> Result<()> {
        require_engine(engine_type)?;
        let contract = Contract::new(false, parameter);
        let id = contract.id();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = thread::spawn(move || {
            let outcome = ContractManager::instance().run_execute_registered(contract);
            let _ = done_tx.send(());
            outcome
        });
        self.watch(id, done_rx, timeout);
        match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(ContractError::Internal("contract worker panicked".to_string()).into()),
        }
    }

    /// As [`query`](Self::query), but run on a worker thread and cancelled
    /// if it outlives `timeout`.
    pub fn query_with_timeout(
        &self,
        engine_type: i32,
        parameter: ContractParameter,
        timeout: Duration,
    ) -> (bool, JsonValue) {
        if let Err(err) = require_engine(engine_type) {
            return (false, json!({ "error_desc_f": { "exception": err.to_string() } }));
        }
        let contract = Contract::new(true, parameter);
        let id = contract.id();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = thread::spawn(move || {
            let outcome = ContractManager::instance().run_query_registered(contract);
            let _ = done_tx.send(());
            outcome
        });
        self.watch(id, done_rx, timeout);
        match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => (
                false,
                json!({ "error_desc_f": { "exception": "contract worker panicked" } }),
            ),
        }
    }

    /// Request cancellation of a running contract. Unknown ids are a
    /// no-op: the contract may simply have finished already.
    pub fn cancel(&self, contract_id: i64) -> bool {
        let contract = self.contracts.lock().unwrap().get(&contract_id).cloned();
        match contract {
            Some(contract) => {
                info!("cancelling contract {contract_id}");
                contract.cancel()
            }
            None => {
                info!("cancel: contract {contract_id} is not running");
                true
            }
        }
    }

    pub fn get_contract(&self, contract_id: i64) -> Option<Arc<Contract>> {
        self.contracts.lock().unwrap().get(&contract_id).cloned()
    }

    // ── lifecycle plumbing ───────────────────────────────────────────────────

    fn run_execute_registered(&self, contract: Arc<Contract>) -> Result<()> {
        let id = contract.id();
        self.contracts.lock().unwrap().insert(id, contract.clone());

        if let Some(ctx) = &contract.parameter().ledger_context {
            ctx.lock().unwrap().push_contract_id(id);
        }
        let outcome = vm::run_execute(&contract);
        if let Some(ctx) = &contract.parameter().ledger_context {
            let mut guard = ctx.lock().unwrap();
            guard.pop_contract_id();
            guard.push_log(&contract.parameter().this_address, contract.logs());
        }
        if let Err(err) = &outcome {
            contract.set_error_msg(err.to_string());
            error!(contract = id, "contract execution failed: {err}");
        }

        self.contracts.lock().unwrap().remove(&id);
        outcome.map_err(Into::into)
    }

    fn run_query_registered(&self, contract: Arc<Contract>) -> (bool, JsonValue) {
        let id = contract.id();
        self.contracts.lock().unwrap().insert(id, contract.clone());

        if let Some(ctx) = &contract.parameter().ledger_context {
            ctx.lock().unwrap().push_contract_id(id);
        }
        let mut js_result = json!({});
        let ok = match vm::run_query(&contract) {
            Ok(tagged) => {
                js_result["result"] = json!([tagged]);
                true
            }
            Err(err) => {
                contract.set_error_msg(err.to_string());
                js_result["error_desc_f"] = err.report_json();
                warn!(contract = id, "contract query failed: {err}");
                false
            }
        };
        if let Some(ctx) = &contract.parameter().ledger_context {
            let mut guard = ctx.lock().unwrap();
            guard.pop_contract_id();
            guard.push_log(&contract.parameter().this_address, contract.logs());
            let mut ret = js_result.clone();
            ret["success"] = json!(ok);
            guard.push_ret(&contract.parameter().this_address, ret);
        }

        self.contracts.lock().unwrap().remove(&id);
        (ok, js_result)
    }

    /// Watchdog half of the timeout variants: wait for the worker's done
    /// signal, cancel the contract if the bound passes first.
    fn watch(&self, id: i64, done_rx: mpsc::Receiver<()>, timeout: Duration) {
        match done_rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("contract {id} exceeded {timeout:?}, cancelling");
                self.cancel(id);
            }
        }
    }
}

fn require_engine(engine_type: i32) -> std::result::Result<(), ContractError> {
    if engine_type == ENGINE_JS {
        Ok(())
    } else {
        error!("contract engine type ({engine_type}) not supported");
        Err(ContractError::UnsupportedEngine(engine_type))
    }
}

/// `<exe-dir>/jslib`, the conventional install layout.
fn default_jslib_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("jslib")))
        .unwrap_or_else(|| PathBuf::from("jslib"))
}
