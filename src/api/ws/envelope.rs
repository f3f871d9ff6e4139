//! Two-level message envelope parsing and validation.
//!
//! Every inbound text frame must decode to
//! `{"target": string, "data": {"action": string, "data": object}}`, with
//! the built-in `ping` target short-circuiting before the inner checks.
//! Errors are reported to the client verbatim and never close the
//! connection.

use serde_json::{Map, Value};

pub const ERR_INVALID_DATA: &str = "Invalid data.";
pub const ERR_NO_DATA: &str = "No data provided.";
pub const ERR_NO_TARGET: &str = "No target provided or target invalid.";
pub const ERR_NO_DATA_FIELD: &str = "No data provided or data invalid.";
pub const ERR_NO_ACTION: &str = "No action provided or action invalid.";

/// Liveness target answered by the framing layer itself.
const PING_TARGET: &str = "ping";

/// A fully validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Built-in liveness check; reply `{"target":"pong"}` and skip dispatch.
    Ping,
    /// Route `action`/`data` to the worker registered for `target`.
    Dispatch {
        target: String,
        action: String,
        data: Map<String, Value>,
    },
}

/// Field present, non-null, and a string.
fn string_field<'a>(data: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

/// Field present, non-null, and an object.
fn object_field<'a>(data: &'a Map<String, Value>, field: &str) -> Option<&'a Map<String, Value>> {
    data.get(field).and_then(Value::as_object)
}

/// Validate a decoded frame against the envelope schema.
///
/// The error is the exact message to report back to the client.
pub fn parse(value: &Value) -> Result<Inbound, &'static str> {
    let content = value.as_object().ok_or(ERR_INVALID_DATA)?;

    if content.is_empty() {
        return Err(ERR_NO_DATA);
    }

    let target = string_field(content, "target").ok_or(ERR_NO_TARGET)?;
    let data = object_field(content, "data").ok_or(ERR_NO_DATA_FIELD)?;

    if target == PING_TARGET {
        return Ok(Inbound::Ping);
    }

    let action = string_field(data, "action").ok_or(ERR_NO_ACTION)?;
    let inner = object_field(data, "data").ok_or(ERR_NO_DATA_FIELD)?;

    Ok(Inbound::Dispatch {
        target: target.to_string(),
        action: action.to_string(),
        data: inner.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_short_circuits_before_inner_checks() {
        let frame = json!({"target": "ping", "data": {}});
        assert_eq!(parse(&frame), Ok(Inbound::Ping));
    }

    #[test]
    fn empty_object_reports_no_data() {
        assert_eq!(parse(&json!({})), Err(ERR_NO_DATA));
    }

    #[test]
    fn non_object_frames_report_invalid_data() {
        assert_eq!(parse(&json!([1, 2, 3])), Err(ERR_INVALID_DATA));
        assert_eq!(parse(&json!("text")), Err(ERR_INVALID_DATA));
        assert_eq!(parse(&json!(42)), Err(ERR_INVALID_DATA));
        assert_eq!(parse(&json!(null)), Err(ERR_INVALID_DATA));
    }

    #[test]
    fn missing_or_invalid_target_is_reported() {
        assert_eq!(parse(&json!({"data": {}})), Err(ERR_NO_TARGET));
        assert_eq!(
            parse(&json!({"target": null, "data": {}})),
            Err(ERR_NO_TARGET)
        );
        assert_eq!(parse(&json!({"target": 7, "data": {}})), Err(ERR_NO_TARGET));
    }

    #[test]
    fn missing_or_invalid_data_is_reported() {
        assert_eq!(parse(&json!({"target": "x"})), Err(ERR_NO_DATA_FIELD));
        assert_eq!(
            parse(&json!({"target": "x", "data": null})),
            Err(ERR_NO_DATA_FIELD)
        );
        assert_eq!(
            parse(&json!({"target": "x", "data": [1]})),
            Err(ERR_NO_DATA_FIELD)
        );
    }

    #[test]
    fn missing_inner_action_is_reported() {
        assert_eq!(
            parse(&json!({"target": "x", "data": {}})),
            Err(ERR_NO_ACTION)
        );
        assert_eq!(
            parse(&json!({"target": "x", "data": {"action": null, "data": {}}})),
            Err(ERR_NO_ACTION)
        );
    }

    #[test]
    fn missing_inner_data_is_reported() {
        assert_eq!(
            parse(&json!({"target": "x", "data": {"action": "do"}})),
            Err(ERR_NO_DATA_FIELD)
        );
        assert_eq!(
            parse(&json!({"target": "x", "data": {"action": "do", "data": "no"}})),
            Err(ERR_NO_DATA_FIELD)
        );
    }

    #[test]
    fn well_formed_frames_dispatch() {
        let frame = json!({
            "target": "users",
            "data": {"action": "new", "data": {"email": "a@example.com"}},
        });
        let parsed = parse(&frame);
        assert_eq!(
            parsed,
            Ok(Inbound::Dispatch {
                target: "users".to_string(),
                action: "new".to_string(),
                data: json!({"email": "a@example.com"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            })
        );
    }
}
