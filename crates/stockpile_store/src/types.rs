//! Common data types crossing the store boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Credentials for authenticating against a remote store.
///
/// The `Debug` implementation masks the password so credentials can be
/// logged as part of larger structures without leaking secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates a new credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Metadata about a document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Number of live documents.
    pub doc_count: u64,
    /// Opaque update sequence. Either a JSON number or a compound
    /// `"<integer>-<opaque>"` string, depending on the store backend.
    pub update_seq: Value,
}

impl StoreInfo {
    /// Creates store metadata with a numeric update sequence.
    pub fn new(doc_count: u64, update_seq: impl Into<Value>) -> Self {
        Self {
            doc_count,
            update_seq: update_seq.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let credentials = Credentials::new("warehouse", "hunter2");
        let output = format!("{credentials:?}");
        assert!(output.contains("warehouse"));
        assert!(output.contains("<redacted>"));
        assert!(!output.contains("hunter2"));
    }

    #[test]
    fn store_info_accepts_compound_seq() {
        let info = StoreInfo::new(3, "12-g1AAAA");
        assert_eq!(info.update_seq, Value::from("12-g1AAAA"));
    }
}
