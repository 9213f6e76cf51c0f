//! Record identity and record payload types shared by every command kind.

use crate::constants::ResultCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Bin values are carried as JSON values; the wire codec decides their encoding
pub type Value = serde_json::Value;

/// User supplied part of a record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKey {
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<i64> for UserKey {
    fn from(value: i64) -> Self {
        UserKey::Int(value)
    }
}

impl From<&str> for UserKey {
    fn from(value: &str) -> Self {
        UserKey::String(value.to_string())
    }
}

impl From<String> for UserKey {
    fn from(value: String) -> Self {
        UserKey::String(value)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(value: Vec<u8>) -> Self {
        UserKey::Bytes(value)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Int(v) => write!(f, "{v}"),
            UserKey::String(v) => write!(f, "{v}"),
            UserKey::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Unique record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Namespace the record lives in
    pub namespace: String,
    /// Set within the namespace
    pub set_name: String,
    pub user_key: UserKey,
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: user_key.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set_name, self.user_key)
    }
}

/// Named value written to or read from a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Decoded record payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub bins: HashMap<String, Value>,
    #[serde(default)]
    pub generation: u32,
    /// Expiration in seconds since the server epoch; 0 means never
    #[serde(default)]
    pub expiration: u32,
}

impl Record {
    pub fn get(&self, bin: &str) -> Option<&Value> {
        self.bins.get(bin)
    }
}

/// User defined function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfCall {
    /// Server side module containing the function
    pub package: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl UdfCall {
    pub fn new(package: impl Into<String>, function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            package: package.into(),
            function: function.into(),
            args,
        }
    }
}

/// Outcome for a single key of a batch command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub key: Key,
    /// Record payload when the key was read successfully
    pub record: Option<Record>,
    pub result_code: ResultCode,
    /// Whether the outcome for this key is ambiguous
    pub in_doubt: bool,
}

impl BatchRecord {
    pub fn new(key: Key, record: Option<Record>, result_code: ResultCode) -> Self {
        Self {
            key,
            record,
            result_code,
            in_doubt: false,
        }
    }

    /// Placeholder for a key whose sub-batch never reported
    pub fn unresolved(key: Key) -> Self {
        Self::new(key, None, ResultCode::NO_RESPONSE)
    }

    /// Whether the key exists on the server
    pub fn exists(&self) -> bool {
        self.result_code.is_ok()
    }
}
