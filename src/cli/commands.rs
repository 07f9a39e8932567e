//! Implementations of the CLI subcommands.
//!
//! Every command drives the contract manager against a freshly seeded
//! [`MemoryLedger`]: the contract's own account carries the source as its
//! payload (so nested `callBackContractQuery` calls back into it resolve),
//! and a minimal closed-ledger header is present for
//! `callBackGetLedgerInfo`.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::cli::{CheckArgs, RunArgs, Verbosity};
use crate::ledger::{LedgerContext, LedgerHost, MemoryLedger, SharedLedgerContext};
use crate::protocol::{Account, ContractCode, LedgerHeader};
use crate::runtime::contract::{ContractParameter, ENGINE_JS};
use crate::runtime::manager::ContractManager;
use crate::runtime::vm::CheckStrictness;
use crate::Result;

pub fn check(args: CheckArgs, _verbosity: Verbosity) -> Result<()> {
    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read contract {}", args.file.display()))?;
    let strictness = if args.require_entry {
        CheckStrictness::RequireEntry
    } else {
        CheckStrictness::CompileOnly
    };
    ContractManager::instance().source_code_check(ENGINE_JS, &code, strictness)?;
    println!("source check passed: {}", args.file.display());
    Ok(())
}

pub fn run(args: RunArgs, verbosity: Verbosity) -> Result<()> {
    let (parameter, ledger, ctx) = setup(&args)?;
    let spinner = start_spinner(verbosity, "Executing contract...");

    let outcome = ContractManager::instance().execute_with_timeout(
        ENGINE_JS,
        parameter,
        Duration::from_secs(args.timeout_secs),
    );
    spinner.finish_and_clear();

    print_logs(&ctx);
    match outcome {
        Ok(()) => {
            ledger.commit_frame(&ctx);
            println!("execution succeeded");
            Ok(())
        }
        Err(err) => {
            eprintln!("execution failed: {err}");
            Err(err)
        }
    }
}

pub fn query(args: RunArgs, verbosity: Verbosity) -> Result<()> {
    let (parameter, _ledger, ctx) = setup(&args)?;
    let spinner = start_spinner(verbosity, "Querying contract...");

    let (ok, mut result) = ContractManager::instance().query_with_timeout(
        ENGINE_JS,
        parameter,
        Duration::from_secs(args.timeout_secs),
    );
    spinner.finish_and_clear();

    print_logs(&ctx);
    result["success"] = json!(ok);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if ok {
        Ok(())
    } else {
        anyhow::bail!("query failed")
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn setup(args: &RunArgs) -> Result<(ContractParameter, Arc<MemoryLedger>, SharedLedgerContext)> {
    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read contract {}", args.file.display()))?;

    ContractManager::instance().initialize(args.jslib.as_deref())?;

    let ledger = Arc::new(MemoryLedger::new());
    ledger.put_account(Account::new(&args.sender));
    let mut contract_account = Account::new(&args.this_address);
    contract_account.contract = Some(ContractCode {
        engine_type: ENGINE_JS,
        payload: code.clone(),
    });
    ledger.put_account(contract_account);
    ledger.put_header(LedgerHeader {
        seq: 1,
        ..Default::default()
    });

    let ctx = LedgerContext::shared_with_frame();
    let parameter = ContractParameter {
        code,
        input: args.input.clone(),
        sender: args.sender.clone(),
        this_address: args.this_address.clone(),
        ope_index: 0,
        trigger_tx: args.trigger.clone(),
        consensus_value: args.consensus_value.clone(),
        ledger_context: Some(ctx.clone()),
        ledger: Some(ledger.clone() as Arc<dyn LedgerHost>),
    };
    Ok((parameter, ledger, ctx))
}

fn start_spinner(verbosity: Verbosity, message: &str) -> ProgressBar {
    if verbosity > Verbosity::Normal {
        // Verbose runs interleave tracing output; skip the spinner.
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_logs(ctx: &SharedLedgerContext) {
    let guard = ctx.lock().unwrap();
    for record in guard.logs() {
        for line in &record.lines {
            println!("[{}] {}", record.address, line);
        }
    }
}
