//! Vendor response envelope normalization.
//!
//! Most endpoints wrap their payload as `{ret, errmsg, data}`. `ret` is a
//! stringified number: `"0"` is success, `"5000"` means the account has no
//! credits, anything else is a generic failure. A handful of endpoints
//! skip the envelope entirely; those responses pass through untouched.

use serde_json::Value;

use crate::error::{JimengError, Result};

/// Normalize an envelope into its `data` payload or a typed failure.
pub fn normalize(payload: Value) -> Result<Value> {
    let Some(ret) = ret_code(&payload) else {
        // Not an envelope; hand the raw payload back.
        return Ok(payload);
    };

    let errmsg = payload
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match ret.as_str() {
        "0" => Ok(payload.get("data").cloned().unwrap_or(Value::Null)),
        "5000" => Err(JimengError::InsufficientBalance(errmsg)),
        other => Err(JimengError::request_failed(format!(
            "ret={other}: {errmsg}"
        ))),
    }
}

/// Extract `ret` as a numeric code string, or `None` when the payload is
/// not an envelope.
///
/// The wire always carries `ret` as a stringified number, but a bare
/// JSON number is accepted as the same code rather than rejected as a
/// malformed envelope.
fn ret_code(payload: &Value) -> Option<String> {
    match payload.get("ret")? {
        Value::String(s) if s.parse::<f64>().is_ok() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
