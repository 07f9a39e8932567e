//! Host-callback surface injected into contract scripts.
//!
//! Each contract-visible global (`callBackLog`, `callBackGetAccountInfo`,
//! …) is a small JS shim installed by the bootstrap script. The shim owns
//! the engine side of the boundary (arity and `typeof` validation, JSON
//! stringification, envelope decoding) and then calls a synchronous op.
//! The op owns the host side: instance recovery, ledger routing, error
//! logging. A validation failure on either side surfaces to the contract
//! as the boolean `false`; no exception crosses into the script.
//!
//! The bootstrap captures `Deno.core` in a closure and then deletes the
//! `Deno` global, sealing the sandbox: contract code can only reach the
//! host through the shims. In readonly mode the two mutating callbacks are
//! bound as stubs that log the rejection and return `false`, so a query
//! that touches them keeps running and observes the failure; the ops
//! enforce the same rule again for the mutating bindings.

use std::borrow::Cow;
use std::sync::Arc;

use deno_core::{op2, Extension, OpDecl, OpState};
use serde_json::{json, Value as JsonValue};
use tracing::{error, info};

use crate::protocol::{
    self, AssetProperty, Operation, OperationSetMetadata, OperationType, Transaction,
    TransactionEnv,
};
use crate::runtime::contract::{Contract, ContractParameter};
use crate::runtime::loader;
use crate::runtime::manager::ContractManager;

/// Back-reference from the isolate to its owning contract instance,
/// stashed in the runtime's op state. Host callbacks recover their
/// instance from here; script code has no path to it.
#[derive(Clone)]
pub(crate) struct CallbackContext {
    pub contract: Arc<Contract>,
}

pub(crate) fn extension() -> Extension {
    const OPS: &[OpDecl] = &[
        op_callback_error(),
        op_contract_log(),
        op_get_account_info(),
        op_get_account_asset(),
        op_get_account_metadata(),
        op_get_ledger_info(),
        op_contract_query(),
        op_set_account_metadata(),
        op_do_operation(),
        op_include_source(),
    ];
    Extension {
        name: "chainscript_host",
        ops: Cow::Borrowed(OPS),
        ..Default::default()
    }
}

/// The shims installed into every contract context.
pub(crate) fn bootstrap_source(readonly: bool) -> String {
    if readonly {
        [BOOTSTRAP_HEAD, BOOTSTRAP_READONLY_STUBS, BOOTSTRAP_TAIL].concat()
    } else {
        [BOOTSTRAP_HEAD, BOOTSTRAP_MUTATING, BOOTSTRAP_TAIL].concat()
    }
}

// ── account lookup ────────────────────────────────────────────────────────────

/// Read path shared by every account-touching callback: the top
/// transaction frame first (so contracts see uncommitted writes of the
/// enclosing operations), falling through to the persistent store on miss.
fn lookup_account(contract: &Contract, address: &str) -> Option<protocol::Account> {
    let parameter = contract.parameter();
    if let Some(ctx) = &parameter.ledger_context {
        let guard = ctx.lock().unwrap();
        if let Some(frame) = guard.transaction_stack.last() {
            if let Some(account) = frame.environment.get_entry(address) {
                return Some(account);
            }
        }
    }
    parameter
        .ledger
        .as_ref()
        .and_then(|ledger| ledger.account_from_db(address))
}

// ── ops ───────────────────────────────────────────────────────────────────────

/// Shim-side validation failures land here so they still show up in the
/// host log.
#[op2(fast)]
fn op_callback_error(#[string] message: String) {
    error!("contract callback rejected: {message}");
}

#[op2(fast)]
fn op_contract_log(state: &mut OpState, #[string] line: String) {
    let cb = state.borrow::<CallbackContext>();
    info!(
        contract = cb.contract.id(),
        address = %cb.contract.parameter().this_address,
        "contract log: {line}"
    );
    cb.contract.add_log(line);
}

#[op2]
#[serde]
fn op_get_account_info(state: &mut OpState, #[string] address: String) -> JsonValue {
    let cb = state.borrow::<CallbackContext>();
    match lookup_account(&cb.contract, &address) {
        Some(account) => account.proto_json(),
        None => {
            error!("callBackGetAccountInfo: account `{address}` not found");
            JsonValue::Bool(false)
        }
    }
}

#[op2]
#[serde]
fn op_get_account_asset(
    state: &mut OpState,
    #[string] address: String,
    #[serde] property: JsonValue,
) -> JsonValue {
    let cb = state.borrow::<CallbackContext>();
    let property: AssetProperty = match protocol::from_json(property) {
        Ok(property) => property,
        Err(err) => {
            error!("callBackGetAccountAsset: asset property not valid: {err}");
            return JsonValue::Bool(false);
        }
    };
    let Some(account) = lookup_account(&cb.contract, &address) else {
        error!("callBackGetAccountAsset: account `{address}` not found");
        return JsonValue::Bool(false);
    };
    match account.get_asset(&property) {
        Some(asset) => protocol::to_json(asset),
        None => JsonValue::Bool(false),
    }
}

#[op2]
#[serde]
fn op_get_account_metadata(
    state: &mut OpState,
    #[string] address: String,
    #[string] key: String,
) -> JsonValue {
    let cb = state.borrow::<CallbackContext>();
    let Some(account) = lookup_account(&cb.contract, &address) else {
        error!("callBackGetAccountMetaData: account `{address}` not found");
        return JsonValue::Bool(false);
    };
    match account.get_metadata(&key) {
        Some(kv) => protocol::to_json(kv),
        None => JsonValue::Bool(false),
    }
}

#[op2]
#[serde]
fn op_get_ledger_info(state: &mut OpState, #[string] seq: String) -> JsonValue {
    let cb = state.borrow::<CallbackContext>();
    let Some(ledger) = cb.contract.parameter().ledger.clone() else {
        error!("callBackGetLedgerInfo: contract has no ledger");
        return JsonValue::Bool(false);
    };
    let seq: i64 = seq.trim().parse().unwrap_or(0);
    let last = ledger.get_last_closed_ledger();
    if seq <= last.seq - 1024 || seq > last.seq {
        error!(
            "callBackGetLedgerInfo: seq {seq} outside ({}, {}]",
            last.seq - 1024,
            last.seq
        );
        return JsonValue::Bool(false);
    }
    match ledger.load_header(seq) {
        Some(header) => protocol::to_json(&header),
        None => JsonValue::Bool(false),
    }
}

/// Nested readonly invocation of another contract. Runs on the calling
/// thread with a fresh instance and a fresh isolate; the shared ledger
/// context makes the callee's frame nest under the caller's.
#[op2(reentrant)]
#[serde]
fn op_contract_query(
    state: &mut OpState,
    #[string] address: String,
    #[string] input: String,
) -> JsonValue {
    let cb = state.borrow::<CallbackContext>().clone();
    let failed = json!({ "success": false });

    let parameter = cb.contract.parameter();
    let Some(ctx) = parameter.ledger_context.clone() else {
        error!("callBackContractQuery: contract has no ledger context");
        return failed;
    };
    let Some(account) = lookup_account(&cb.contract, &address) else {
        error!("callBackContractQuery: account `{address}` not found");
        return failed;
    };
    let Some(code) = account.contract else {
        error!("callBackContractQuery: `{address}` is not a contract account");
        return failed;
    };
    if code.payload.is_empty() {
        error!("callBackContractQuery: `{address}` has an empty contract payload");
        return failed;
    }

    let callee_parameter = ContractParameter {
        code: code.payload,
        input,
        sender: parameter.this_address.clone(),
        this_address: address,
        ope_index: 0,
        trigger_tx: "{}".to_string(),
        consensus_value: parameter.consensus_value.clone(),
        ledger_context: Some(ctx),
        ledger: parameter.ledger.clone(),
    };

    let (ok, query_result) =
        ContractManager::instance().query(code.engine_type, callee_parameter);

    let mut outcome = json!({ "success": ok });
    if ok {
        if let Some(first) = query_result.get("result").and_then(|r| r.get(0)) {
            outcome["result"] = first.clone();
        }
    }
    outcome
}

#[op2]
fn op_set_account_metadata(state: &mut OpState, #[serde] metadata: JsonValue) -> bool {
    let cb = state.borrow::<CallbackContext>().clone();
    let contract = &cb.contract;

    let set_metadata: OperationSetMetadata = match protocol::from_json(metadata) {
        Ok(op) => op,
        Err(err) => {
            error!("callBackSetAccountMetaData: metadata operation not valid: {err}");
            return false;
        }
    };

    let parameter = contract.parameter();
    let (Some(ctx), Some(ledger)) = (
        parameter.ledger_context.clone(),
        parameter.ledger.clone(),
    ) else {
        error!("callBackSetAccountMetaData: contract has no ledger context");
        return false;
    };
    if contract.is_readonly() {
        error!("callBackSetAccountMetaData: contract is readonly");
        return false;
    }

    // The source address comes from the host-held parameter, not from any
    // script-reachable global.
    let contractor = parameter.this_address.clone();
    let env = TransactionEnv {
        transaction: Transaction {
            source_address: contractor,
            operations: vec![Operation {
                op_type: OperationType::SetMetadata,
                set_metadata: Some(set_metadata),
                ..Default::default()
            }],
            ..Default::default()
        },
    };

    if !ledger.do_transaction(env, &ctx) {
        error!("callBackSetAccountMetaData: transaction submission failed");
        return false;
    }
    contract.inc_tx_do_count();
    true
}

#[op2]
fn op_do_operation(state: &mut OpState, #[serde] transaction: JsonValue) -> bool {
    let cb = state.borrow::<CallbackContext>().clone();
    let contract = &cb.contract;

    let mut transaction: Transaction = match protocol::from_json(transaction) {
        Ok(tx) => tx,
        Err(err) => {
            error!("callBackDoOperation: transaction not valid: {err}");
            return false;
        }
    };

    let parameter = contract.parameter();
    let (Some(ctx), Some(ledger)) = (
        parameter.ledger_context.clone(),
        parameter.ledger.clone(),
    ) else {
        error!("callBackDoOperation: contract has no ledger context");
        return false;
    };
    if contract.is_readonly() {
        error!("callBackDoOperation: contract is readonly");
        return false;
    }

    // Whatever the contract wrote into the envelope, the source of the
    // transaction and of every operation is the contract itself.
    let contractor = parameter.this_address.clone();
    transaction.source_address = contractor.clone();
    for op in &mut transaction.operations {
        op.source_address = contractor.clone();
    }

    let env = TransactionEnv { transaction };
    if !ledger.do_transaction(env, &ctx) {
        error!("callBackDoOperation: transaction submission failed");
        return false;
    }
    contract.inc_tx_do_count();
    true
}

#[op2]
#[serde]
fn op_include_source(#[string] name: String) -> JsonValue {
    match loader::library_source(&name) {
        Some(source) => JsonValue::String(source.to_string()),
        None => {
            error!("include: library `{name}` not found in jslib directory");
            JsonValue::Bool(false)
        }
    }
}

// ── bootstrap shims ───────────────────────────────────────────────────────────

const BOOTSTRAP_HEAD: &str = r#"(function () {
  "use strict";
  const core = Deno.core;
  const untag = (tagged) => {
    if (tagged === null || typeof tagged !== "object") return tagged;
    switch (tagged.type) {
      case "jsobject":
        return JSON.parse(tagged.value);
      case "number": {
        const bytes = new Uint8Array(8);
        for (let i = 0; i < 8; i++) {
          bytes[i] = parseInt(tagged.value.substr(i * 2, 2), 16);
        }
        return new DataView(bytes.buffer).getFloat64(0, true);
      }
      case "string":
        return tagged.value;
      case "bool":
        return tagged.value;
      default:
        return false;
    }
  };
  globalThis.callBackLog = function (...args) {
    if (args.length < 1) {
      core.ops.op_callback_error("callBackLog expects at least one argument");
      return false;
    }
    const value = args[0];
    if (value === undefined) return;
    let line;
    try {
      line = typeof value === "object" && value !== null ? JSON.stringify(value) : String(value);
    } catch (_) {
      line = String(value);
    }
    core.ops.op_contract_log(String(line));
  };
  globalThis.callBackGetAccountInfo = function (...args) {
    if (args.length !== 1 || typeof args[0] !== "string") {
      core.ops.op_callback_error("callBackGetAccountInfo expects (string address)");
      return false;
    }
    return core.ops.op_get_account_info(args[0]);
  };
  globalThis.callBackGetAccountAsset = function (...args) {
    if (args.length !== 2 || typeof args[0] !== "string" ||
        typeof args[1] !== "object" || args[1] === null) {
      core.ops.op_callback_error("callBackGetAccountAsset expects (string address, object property)");
      return false;
    }
    return core.ops.op_get_account_asset(args[0], args[1]);
  };
  globalThis.callBackGetAccountMetaData = function (...args) {
    if (args.length !== 2 || typeof args[0] !== "string" || typeof args[1] !== "string") {
      core.ops.op_callback_error("callBackGetAccountMetaData expects (string address, string key)");
      return false;
    }
    return core.ops.op_get_account_metadata(args[0], args[1]);
  };
  globalThis.callBackGetLedgerInfo = function (...args) {
    if (args.length !== 1) {
      core.ops.op_callback_error("callBackGetLedgerInfo expects (seq)");
      return false;
    }
    return core.ops.op_get_ledger_info(String(args[0]));
  };
  globalThis.callBackContractQuery = function (...args) {
    if (args.length !== 2 || typeof args[0] !== "string" || typeof args[1] !== "string") {
      core.ops.op_callback_error("callBackContractQuery expects (string address, string input)");
      return false;
    }
    const outcome = core.ops.op_contract_query(args[0], args[1]);
    const wrapped = { success: outcome.success === true };
    if (wrapped.success && outcome.result !== undefined) {
      wrapped.result = untag(outcome.result);
    }
    return wrapped;
  };
  globalThis.include = function (...args) {
    if (args.length !== 1 || typeof args[0] !== "string") {
      core.ops.op_callback_error("include expects (string name)");
      return false;
    }
    const source = core.ops.op_include_source(args[0]);
    if (source === false) return false;
    try {
      (0, eval)(source);
    } catch (err) {
      core.ops.op_callback_error("include of " + args[0] + " failed: " + String(err));
      return false;
    }
  };
"#;

const BOOTSTRAP_MUTATING: &str = r#"  globalThis.callBackSetAccountMetaData = function (...args) {
    if (args.length !== 1 || typeof args[0] !== "object" || args[0] === null) {
      core.ops.op_callback_error("callBackSetAccountMetaData expects (object metadata)");
      return false;
    }
    return core.ops.op_set_account_metadata(args[0]);
  };
  globalThis.callBackDoOperation = function (...args) {
    if (args.length !== 1 || typeof args[0] !== "object" || args[0] === null) {
      core.ops.op_callback_error("callBackDoOperation expects (object transaction)");
      return false;
    }
    return core.ops.op_do_operation(args[0]);
  };
"#;

const BOOTSTRAP_READONLY_STUBS: &str = r#"  globalThis.callBackSetAccountMetaData = function () {
    core.ops.op_callback_error("callBackSetAccountMetaData is forbidden in readonly mode");
    return false;
  };
  globalThis.callBackDoOperation = function () {
    core.ops.op_callback_error("callBackDoOperation is forbidden in readonly mode");
    return false;
  };
"#;

const BOOTSTRAP_TAIL: &str = r#"  delete globalThis.Deno;
})();
"#;

// ── tests ─────────────────────────────────────────────────────────────────────
