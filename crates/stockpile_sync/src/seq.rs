//! Replication checkpoint normalization.

use serde_json::Value;

/// Extracts the comparable integer from a replication checkpoint.
///
/// Store backends report checkpoints either as a non-negative integer or as
/// a compound `"<integer>-<opaque>"` string. Every other shape (null,
/// booleans, floats, negative numbers, arrays, objects, strings without a
/// leading integer) normalizes to `None`. Total: malformed input is an
/// absent value, never an error.
pub fn seq_value(checkpoint: &Value) -> Option<u64> {
    match checkpoint {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.split('-').next().and_then(|lead| lead.parse().ok()),
        _ => None,
    }
}
