//! Ledger-side working state and the narrow collaborator interfaces the
//! contract runtime consumes.
//!
//! The runtime never talks to storage or consensus directly. It sees:
//! - a [`LedgerContext`]: the per-ledger-transaction scratch state carrying
//!   a stack of transaction frames with pending account mutations, the
//!   stack of currently running contract ids, and the logs / return values
//!   drained from finished invocations;
//! - a [`LedgerManager`] that owns transaction submission and closed-ledger
//!   headers;
//! - an [`AccountSource`] for persistent-store fallback reads.
//!
//! [`MemoryLedger`] implements both traits over in-memory maps and is what
//! the CLI and the test suite run against.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tracing::{error, warn};

use crate::protocol::{Account, LedgerHeader, OperationType, TransactionEnv};

/// How the runtime holds the context: shared with the enclosing ledger and
/// with any thread that wants to observe or cancel the running contract.
pub type SharedLedgerContext = Arc<Mutex<LedgerContext>>;

/// Pending account state for one transaction frame.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: HashMap<String, Account>,
}

impl Environment {
    pub fn get_entry(&self, address: &str) -> Option<Account> {
        self.entries.get(address).cloned()
    }

    pub fn set_entry(&mut self, account: Account) {
        self.entries.insert(account.address.clone(), account);
    }

    pub fn entries(&self) -> impl Iterator<Item = &Account> {
        self.entries.values()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFrame {
    pub environment: Environment,
}

/// Log lines drained from one contract invocation.
#[derive(Debug, Clone)]
pub struct ContractLog {
    pub address: String,
    pub lines: Vec<String>,
}

/// Return record pushed for one query invocation.
#[derive(Debug, Clone)]
pub struct ContractReturn {
    pub address: String,
    pub value: JsonValue,
}

/// Per-ledger-transaction working state.
#[derive(Debug, Default)]
pub struct LedgerContext {
    pub transaction_stack: Vec<TransactionFrame>,
    contract_ids: Vec<i64>,
    logs: Vec<ContractLog>,
    rets: Vec<ContractReturn>,
}

impl LedgerContext {
    /// A shared context with a single open transaction frame, the usual
    /// starting point for driving one contract.
    pub fn shared_with_frame() -> SharedLedgerContext {
        let mut ctx = LedgerContext::default();
        ctx.transaction_stack.push(TransactionFrame::default());
        Arc::new(Mutex::new(ctx))
    }

    pub fn push_contract_id(&mut self, id: i64) {
        self.contract_ids.push(id);
    }

    pub fn pop_contract_id(&mut self) -> Option<i64> {
        self.contract_ids.pop()
    }

    /// Ids of the contracts currently running under this context,
    /// innermost last.
    pub fn contract_ids(&self) -> &[i64] {
        &self.contract_ids
    }

    pub fn push_log(&mut self, address: &str, lines: Vec<String>) {
        self.logs.push(ContractLog {
            address: address.to_string(),
            lines,
        });
    }

    pub fn push_ret(&mut self, address: &str, value: JsonValue) {
        self.rets.push(ContractReturn {
            address: address.to_string(),
            value,
        });
    }

    pub fn logs(&self) -> &[ContractLog] {
        &self.logs
    }

    pub fn rets(&self) -> &[ContractReturn] {
        &self.rets
    }
}

/// Transaction submission and closed-ledger access.
///
/// `do_transaction` must be reentrant with respect to the context it is
/// handed: a contract triggered by one transaction may submit another one
/// against the same context.
pub trait LedgerManager: Send + Sync {
    fn do_transaction(&self, env: TransactionEnv, ctx: &SharedLedgerContext) -> bool;
    fn get_last_closed_ledger(&self) -> LedgerHeader;
    fn load_header(&self, seq: i64) -> Option<LedgerHeader>;
}

/// Persistent-store fallback for account reads.
pub trait AccountSource: Send + Sync {
    fn account_from_db(&self, address: &str) -> Option<Account>;
}

/// What the runtime actually holds: both collaborator roles behind one
/// object-safe handle.
pub trait LedgerHost: LedgerManager + AccountSource {}

impl<T: LedgerManager + AccountSource> LedgerHost for T {}

/// In-memory ledger used by the CLI and the test suite.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<String, Account>>,
    headers: Mutex<HashMap<i64, LedgerHeader>>,
    last_closed: Mutex<LedgerHeader>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger::default()
    }

    pub fn put_account(&self, account: Account) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.address.clone(), account);
    }

    /// Store a header; the highest sequence becomes the last closed ledger.
    pub fn put_header(&self, header: LedgerHeader) {
        {
            let mut last = self.last_closed.lock().unwrap();
            if header.seq >= last.seq {
                *last = header.clone();
            }
        }
        self.headers.lock().unwrap().insert(header.seq, header);
    }

    /// Merge the top transaction frame of `ctx` into the persistent store.
    pub fn commit_frame(&self, ctx: &SharedLedgerContext) {
        let guard = ctx.lock().unwrap();
        if let Some(frame) = guard.transaction_stack.last() {
            let mut accounts = self.accounts.lock().unwrap();
            for account in frame.environment.entries() {
                accounts.insert(account.address.clone(), account.clone());
            }
        }
    }

    fn resolve_account(
        &self,
        staged: &HashMap<String, Account>,
        ctx: &SharedLedgerContext,
        address: &str,
    ) -> Option<Account> {
        if let Some(account) = staged.get(address) {
            return Some(account.clone());
        }
        {
            let guard = ctx.lock().unwrap();
            if let Some(frame) = guard.transaction_stack.last() {
                if let Some(account) = frame.environment.get_entry(address) {
                    return Some(account);
                }
            }
        }
        self.accounts.lock().unwrap().get(address).cloned()
    }
}

impl AccountSource for MemoryLedger {
    fn account_from_db(&self, address: &str) -> Option<Account> {
        self.accounts.lock().unwrap().get(address).cloned()
    }
}

impl LedgerManager for MemoryLedger {
    /// Apply every operation of the transaction or none of them.
    ///
    /// Mutations are staged first and only written back once the whole
    /// operation list has been validated. With an open transaction frame
    /// the writes land in that frame, so the submitting contract reads its
    /// own uncommitted state; without one they go straight to the store.
    fn do_transaction(&self, env: TransactionEnv, ctx: &SharedLedgerContext) -> bool {
        let tx = env.transaction;
        if tx.source_address.is_empty() {
            error!("transaction rejected: empty source address");
            return false;
        }

        let mut staged: HashMap<String, Account> = HashMap::new();
        for op in &tx.operations {
            let op_source = if op.source_address.is_empty() {
                tx.source_address.as_str()
            } else {
                op.source_address.as_str()
            };

            match op.op_type {
                OperationType::SetMetadata => {
                    let Some(set_metadata) = &op.set_metadata else {
                        error!("SET_METADATA operation without payload");
                        return false;
                    };
                    let Some(mut account) = self.resolve_account(&staged, ctx, op_source) else {
                        error!("transaction rejected: account `{op_source}` not found");
                        return false;
                    };
                    if !account.set_metadata(set_metadata) {
                        error!(
                            "transaction rejected: metadata version mismatch on `{}`",
                            set_metadata.key
                        );
                        return false;
                    }
                    staged.insert(account.address.clone(), account);
                }
                other => {
                    warn!("transaction rejected: operation type {other:?} not supported");
                    return false;
                }
            }
        }

        let mut guard = ctx.lock().unwrap();
        if let Some(frame) = guard.transaction_stack.last_mut() {
            for account in staged.into_values() {
                frame.environment.set_entry(account);
            }
        } else {
            drop(guard);
            let mut accounts = self.accounts.lock().unwrap();
            for account in staged.into_values() {
                accounts.insert(account.address.clone(), account);
            }
        }
        true
    }

    fn get_last_closed_ledger(&self) -> LedgerHeader {
        self.last_closed.lock().unwrap().clone()
    }

    fn load_header(&self, seq: i64) -> Option<LedgerHeader> {
        self.headers.lock().unwrap().get(&seq).cloned()
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Operation, OperationSetMetadata, Transaction};

    fn metadata_env(source: &str, key: &str, value: &str) -> TransactionEnv {
        TransactionEnv {
            transaction: Transaction {
                source_address: source.to_string(),
                operations: vec![Operation {
                    op_type: OperationType::SetMetadata,
                    set_metadata: Some(OperationSetMetadata {
                        key: key.to_string(),
                        value: value.to_string(),
                        version: 0,
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn writes_land_in_the_open_frame_not_the_store() {
        let ledger = MemoryLedger::new();
        ledger.put_account(Account::new("src"));
        let ctx = LedgerContext::shared_with_frame();

        assert!(ledger.do_transaction(metadata_env("src", "color", "blue"), &ctx));

        // Uncommitted: visible through the frame, absent from the store.
        let guard = ctx.lock().unwrap();
        let staged = guard.transaction_stack[0]
            .environment
            .get_entry("src")
            .expect("staged account");
        assert_eq!(
            staged.get_metadata("color").map(|kv| kv.value.as_str()),
            Some("blue")
        );
        drop(guard);
        assert!(ledger
            .account_from_db("src")
            .unwrap()
            .get_metadata("color")
            .is_none());

        ledger.commit_frame(&ctx);
        assert_eq!(
            ledger
                .account_from_db("src")
                .unwrap()
                .get_metadata("color")
                .map(|kv| kv.value.clone()),
            Some("blue".to_string())
        );
    }

    #[test]
    fn second_write_reads_the_first_within_one_context() {
        let ledger = MemoryLedger::new();
        ledger.put_account(Account::new("src"));
        let ctx = LedgerContext::shared_with_frame();

        assert!(ledger.do_transaction(metadata_env("src", "k", "v1"), &ctx));

        // Version is now 1; an update with the matching expected version
        // must see the frame state, not the empty store state.
        let update = TransactionEnv {
            transaction: Transaction {
                source_address: "src".to_string(),
                operations: vec![Operation {
                    op_type: OperationType::SetMetadata,
                    set_metadata: Some(OperationSetMetadata {
                        key: "k".to_string(),
                        value: "v2".to_string(),
                        version: 1,
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            },
        };
        assert!(ledger.do_transaction(update, &ctx));
    }

    #[test]
    fn unknown_account_fails_the_whole_transaction() {
        let ledger = MemoryLedger::new();
        let ctx = LedgerContext::shared_with_frame();
        assert!(!ledger.do_transaction(metadata_env("ghost", "k", "v"), &ctx));
        let guard = ctx.lock().unwrap();
        assert!(guard.transaction_stack[0]
            .environment
            .get_entry("ghost")
            .is_none());
    }

    #[test]
    fn last_closed_tracks_highest_sequence() {
        let ledger = MemoryLedger::new();
        ledger.put_header(LedgerHeader {
            seq: 5,
            ..Default::default()
        });
        ledger.put_header(LedgerHeader {
            seq: 3,
            ..Default::default()
        });
        assert_eq!(ledger.get_last_closed_ledger().seq, 5);
        assert_eq!(ledger.load_header(3).map(|h| h.seq), Some(3));
        assert!(ledger.load_header(4).is_none());
    }
}
