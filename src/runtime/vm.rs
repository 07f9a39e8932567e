//! Per-invocation script-engine binding.
//!
//! Every invocation gets a fresh `JsRuntime` built from the host extension
//! in [`super::callbacks`]: one isolate per contract instance, never
//! reused. The binding seals the sandbox (bootstrap shims, `Deno` global
//! removed), injects the contract-visible globals, scrubs the obvious
//! non-determinism out of the environment, runs the user program and calls
//! its entry function, and reduces every failure to a [`ContractError`]
//! carrying an [`ExceptionReport`].
//!
//! Cancellation is a cross-thread `terminate_execution` on the isolate
//! handle the instance holds while it runs.

use std::sync::Arc;

use deno_core::error::CoreError;
use deno_core::{v8, JsRuntime, ModuleCodeString, RuntimeOptions};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::runtime::callbacks::{self, CallbackContext};
use crate::runtime::contract::{Contract, ContractParameter};
use crate::runtime::marshal;
use crate::runtime::report::ExceptionReport;
use crate::ContractError;

pub(crate) const MAIN_ENTRY: &str = "main";
pub(crate) const QUERY_ENTRY: &str = "query";

const SENDER_NAME: &str = "sender";
const THIS_ADDRESS_NAME: &str = "thisAddress";
const TRIGGER_TX_NAME: &str = "trigger";
const TRIGGER_INDEX_NAME: &str = "triggerIndex";
const CONSENSUS_VALUE_NAME: &str = "consensusValue";

/// Run before user code; any later use of these raises a script error.
const SCRUB_SNIPPET: &str = "delete Date; delete Math.random;";

/// How strict a source check is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckStrictness {
    /// Syntax only; the program is never run.
    #[default]
    CompileOnly,
    /// Additionally run the program and require a callable `main`.
    RequireEntry,
}

/// Keeps the instance's isolate handle bound exactly as long as the
/// runtime lives.
struct IsolateBinding<'a>(&'a Contract);

impl Drop for IsolateBinding<'_> {
    fn drop(&mut self) {
        self.0.release_isolate();
    }
}

#[tracing::instrument(skip_all, fields(contract = contract.id()))]
pub(crate) fn run_execute(contract: &Arc<Contract>) -> Result<(), ContractError> {
    run(contract, MAIN_ENTRY).map(|_| ())
}

#[tracing::instrument(skip_all, fields(contract = contract.id()))]
pub(crate) fn run_query(contract: &Arc<Contract>) -> Result<JsonValue, ContractError> {
    run(contract, QUERY_ENTRY)
}

fn run(contract: &Arc<Contract>, entry: &'static str) -> Result<JsonValue, ContractError> {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![callbacks::extension()],
        ..Default::default()
    });
    contract.bind_isolate(runtime.v8_isolate().thread_safe_handle());
    let _binding = IsolateBinding(contract);
    if contract.is_cancelled() {
        return Err(ContractError::Cancelled);
    }

    runtime.op_state().borrow_mut().put(CallbackContext {
        contract: contract.clone(),
    });

    runtime
        .execute_script(
            "chainscript:bootstrap",
            ModuleCodeString::from(callbacks::bootstrap_source(contract.is_readonly())),
        )
        .map_err(|err| {
            if contract.is_cancelled() {
                ContractError::Cancelled
            } else {
                ContractError::Internal(format!("host bootstrap failed: {err}"))
            }
        })?;

    inject_globals(&mut runtime, contract.parameter())?;

    runtime
        .execute_script("chainscript:scrub", ModuleCodeString::from(SCRUB_SNIPPET.to_string()))
        .map_err(|err| {
            if contract.is_cancelled() {
                ContractError::Cancelled
            } else {
                ContractError::Scrub(report_from_core_error(&err))
            }
        })?;

    let code = ModuleCodeString::from(contract.parameter().code.clone());
    if let Err(err) = runtime.execute_script("contract.js", code) {
        if contract.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        return Err(classify_script_error(&err));
    }

    call_entry(&mut runtime, contract, entry)
}

/// Compile-only validation (optionally demanding a callable `main`).
///
/// The instance is a full one so the callback surface resolves, but in
/// `CompileOnly` mode nothing ever runs.
pub(crate) fn check_source(
    contract: &Arc<Contract>,
    strictness: CheckStrictness,
) -> Result<(), ContractError> {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![callbacks::extension()],
        ..Default::default()
    });
    contract.bind_isolate(runtime.v8_isolate().thread_safe_handle());
    let _binding = IsolateBinding(contract);

    runtime
        .op_state()
        .borrow_mut()
        .put(CallbackContext {
            contract: contract.clone(),
        });
    runtime
        .execute_script(
            "chainscript:bootstrap",
            ModuleCodeString::from(callbacks::bootstrap_source(false)),
        )
        .map_err(|err| ContractError::Internal(format!("host bootstrap failed: {err}")))?;
    inject_globals(&mut runtime, contract.parameter())?;

    let scope = &mut runtime.handle_scope();
    let scope = &mut v8::TryCatch::new(scope);
    let source = v8::String::new(scope, &contract.parameter().code)
        .ok_or_else(|| ContractError::Internal("source allocation failed".to_string()))?;
    let Some(script) = v8::Script::compile(scope, source, None) else {
        return Err(ContractError::Compile(ExceptionReport::from_try_catch(scope)));
    };

    if strictness == CheckStrictness::RequireEntry {
        if script.run(scope).is_none() {
            return Err(ContractError::Runtime(ExceptionReport::from_try_catch(scope)));
        }
        let context = scope.get_current_context();
        let global = context.global(scope);
        let key = v8::String::new(scope, MAIN_ENTRY)
            .ok_or_else(|| ContractError::Internal("key allocation failed".to_string()))?;
        let entry = global.get(scope, key.into());
        if !entry.map(|value| value.is_function()).unwrap_or(false) {
            return Err(ContractError::EntryMissing(MAIN_ENTRY));
        }
    }
    Ok(())
}

// ── internals ─────────────────────────────────────────────────────────────────

fn inject_globals(
    runtime: &mut JsRuntime,
    parameter: &ContractParameter,
) -> Result<(), ContractError> {
    let scope = &mut runtime.handle_scope();
    let context = scope.get_current_context();
    let global = context.global(scope);

    set_string(scope, global, SENDER_NAME, &parameter.sender)?;
    set_string(scope, global, THIS_ADDRESS_NAME, &parameter.this_address)?;
    set_json(scope, global, TRIGGER_TX_NAME, &parameter.trigger_tx)?;
    let index = v8::Integer::new(scope, parameter.ope_index);
    set_value(scope, global, TRIGGER_INDEX_NAME, index.into())?;
    set_json(scope, global, CONSENSUS_VALUE_NAME, &parameter.consensus_value)?;
    Ok(())
}

fn set_string(
    scope: &mut v8::HandleScope,
    global: v8::Local<v8::Object>,
    name: &str,
    value: &str,
) -> Result<(), ContractError> {
    let value = v8::String::new(scope, value)
        .ok_or_else(|| ContractError::Internal(format!("allocation failed for `{name}`")))?;
    set_value(scope, global, name, value.into())
}

fn set_json(
    scope: &mut v8::HandleScope,
    global: v8::Local<v8::Object>,
    name: &str,
    raw: &str,
) -> Result<(), ContractError> {
    let scope = &mut v8::TryCatch::new(scope);
    let text = v8::String::new(scope, raw)
        .ok_or_else(|| ContractError::Internal(format!("allocation failed for `{name}`")))?;
    let parsed = v8::json::parse(scope, text)
        .ok_or_else(|| ContractError::Parameter(format!("`{name}` is not valid JSON: {raw}")))?;
    set_value(scope, global, name, parsed)
}

fn set_value(
    scope: &mut v8::HandleScope,
    global: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) -> Result<(), ContractError> {
    let key = v8::String::new(scope, name)
        .ok_or_else(|| ContractError::Internal(format!("allocation failed for `{name}`")))?;
    let _ = global.set(scope, key.into(), value);
    Ok(())
}

/// Look up the entry function on the global object and call it with the
/// single input string. Returns the marshaled call result for queries;
/// `main`'s return value is ignored as the execute path has no use for it.
fn call_entry(
    runtime: &mut JsRuntime,
    contract: &Arc<Contract>,
    entry: &'static str,
) -> Result<JsonValue, ContractError> {
    let scope = &mut runtime.handle_scope();
    let scope = &mut v8::TryCatch::new(scope);
    let context = scope.get_current_context();
    let global = context.global(scope);

    let key = v8::String::new(scope, entry)
        .ok_or_else(|| ContractError::Internal("key allocation failed".to_string()))?;
    let Some(entry_value) = global.get(scope, key.into()) else {
        return Err(ContractError::EntryMissing(entry));
    };
    let Ok(function) = v8::Local::<v8::Function>::try_from(entry_value) else {
        warn!("contract entry `{entry}` missing or not a function");
        return Err(ContractError::EntryMissing(entry));
    };

    let input = v8::String::new(scope, &contract.parameter().input)
        .ok_or_else(|| ContractError::Internal("input allocation failed".to_string()))?;
    let receiver: v8::Local<v8::Value> = global.into();
    let Some(result) = function.call(scope, receiver, &[input.into()]) else {
        if scope.has_terminated() || contract.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        return Err(ContractError::Runtime(ExceptionReport::from_try_catch(scope)));
    };

    if entry == MAIN_ENTRY {
        return Ok(JsonValue::Null);
    }
    marshal::from_v8(scope, result)
}

fn classify_script_error(err: &CoreError) -> ContractError {
    match err {
        CoreError::Js(js_error) => {
            let report = ExceptionReport::from_js_error(js_error);
            if js_error.name.as_deref() == Some("SyntaxError") {
                ContractError::Compile(report)
            } else {
                ContractError::Runtime(report)
            }
        }
        other => ContractError::Internal(other.to_string()),
    }
}

fn report_from_core_error(err: &CoreError) -> ExceptionReport {
    match err {
        CoreError::Js(js_error) => ExceptionReport::from_js_error(js_error),
        other => ExceptionReport::new(other.to_string()),
    }
}
