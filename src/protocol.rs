//! Ledger message types and their JSON mapping.
//!
//! These are the wire shapes the host callbacks exchange with contract code
//! and the ledger collaborators: accounts with assets, key/value metadata
//! and an optional contract payload; transactions built from typed
//! operations; and the closed-ledger header. The JSON mapping is plain
//! serde; [`from_json`] / [`to_json`] are the two entry points the runtime
//! uses so conversion failures always carry a human-readable message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Parse a protocol message out of a JSON value.
pub fn from_json<T: DeserializeOwned>(value: JsonValue) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

/// Serialize a protocol message to a JSON value.
pub fn to_json<T: Serialize>(message: &T) -> JsonValue {
    serde_json::to_value(message).unwrap_or(JsonValue::Bool(false))
}

/// Identifies one asset class: issuer, code and asset kind must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetProperty {
    #[serde(default, rename = "type")]
    pub asset_type: i32,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub property: AssetProperty,
    #[serde(default)]
    pub amount: i64,
}

/// A versioned metadata record on an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub version: i64,
}

/// Contract payload attached to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCode {
    #[serde(default, rename = "type")]
    pub engine_type: i32,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(default)]
    pub nonce: i64,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub metadatas: Vec<KeyPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractCode>,
}

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Account {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Look up the asset matching `property` exactly.
    pub fn get_asset(&self, property: &AssetProperty) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.property == *property)
    }

    /// Look up the metadata record stored under `key`.
    pub fn get_metadata(&self, key: &str) -> Option<&KeyPair> {
        self.metadatas.iter().find(|kv| kv.key == key)
    }

    /// Apply a SET_METADATA operation.
    ///
    /// A non-zero expected version must match the current record's version;
    /// the stored version is bumped on every write.
    pub fn set_metadata(&mut self, op: &OperationSetMetadata) -> bool {
        match self.metadatas.iter_mut().find(|kv| kv.key == op.key) {
            Some(existing) => {
                if op.version != 0 && op.version != existing.version {
                    return false;
                }
                existing.value = op.value.clone();
                existing.version += 1;
                true
            }
            None => {
                if op.version != 0 {
                    return false;
                }
                self.metadatas.push(KeyPair {
                    key: op.key.clone(),
                    value: op.value.clone(),
                    version: 1,
                });
                true
            }
        }
    }

    /// The account as contract-visible JSON.
    pub fn proto_json(&self) -> JsonValue {
        to_json(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSetMetadata {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    #[default]
    Unknown,
    CreateAccount,
    IssueAsset,
    Payment,
    SetMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Empty means "inherit the transaction's source address".
    #[serde(default)]
    pub source_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_metadata: Option<OperationSetMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub source_address: String,
    #[serde(default)]
    pub nonce: i64,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// Transaction plus its envelope-level bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnv {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub previous_hash: String,
    #[serde(default)]
    pub account_tree_hash: String,
    #[serde(default)]
    pub consensus_value_hash: String,
    #[serde(default)]
    pub close_time: i64,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub tx_count: i64,
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn account_json_round_trips() {
        let mut account = Account::new("a001");
        account.assets.push(Asset {
            property: AssetProperty {
                asset_type: 1,
                issuer: "issuer".to_string(),
                code: "CNY".to_string(),
            },
            amount: 500,
        });
        account.metadatas.push(KeyPair {
            key: "k".to_string(),
            value: "v".to_string(),
            version: 1,
        });
        let back: Account = from_json(account.proto_json()).expect("round trip");
        assert_eq!(back, account);
    }

    #[test]
    fn asset_lookup_requires_exact_property() {
        let mut account = Account::new("a001");
        let property = AssetProperty {
            asset_type: 1,
            issuer: "issuer".to_string(),
            code: "GOLD".to_string(),
        };
        account.assets.push(Asset {
            property: property.clone(),
            amount: 7,
        });

        assert_eq!(account.get_asset(&property).map(|a| a.amount), Some(7));
        let other_issuer = AssetProperty {
            issuer: "someone-else".to_string(),
            ..property
        };
        assert!(account.get_asset(&other_issuer).is_none());
    }

    #[test]
    fn set_metadata_versioning() {
        let mut account = Account::new("a001");
        let create = OperationSetMetadata {
            key: "k".to_string(),
            value: "v1".to_string(),
            version: 0,
        };
        assert!(account.set_metadata(&create));
        assert_eq!(account.get_metadata("k").map(|kv| kv.version), Some(1));

        let stale = OperationSetMetadata {
            key: "k".to_string(),
            value: "v2".to_string(),
            version: 9,
        };
        assert!(!account.set_metadata(&stale));

        let current = OperationSetMetadata {
            key: "k".to_string(),
            value: "v2".to_string(),
            version: 1,
        };
        assert!(account.set_metadata(&current));
        assert_eq!(
            account.get_metadata("k").map(|kv| kv.value.as_str()),
            Some("v2")
        );
        assert_eq!(account.get_metadata("k").map(|kv| kv.version), Some(2));
    }

    #[test]
    fn transaction_json_uses_screaming_operation_types() {
        let tx: Transaction = from_json(json!({
            "source_address": "src",
            "operations": [
                { "type": "SET_METADATA", "set_metadata": { "key": "k", "value": "v" } }
            ]
        }))
        .expect("parse transaction");
        assert_eq!(tx.operations[0].op_type, OperationType::SetMetadata);

        let bad = from_json::<Transaction>(json!({
            "operations": [ { "type": "NO_SUCH_OP" } ]
        }));
        let message = bad.expect_err("unknown op type").to_string();
        assert!(message.contains("NO_SUCH_OP") || message.contains("unknown variant"));
    }
}
