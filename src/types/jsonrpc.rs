//! JSON-RPC envelope helpers used by the HTTP transports.
//!
//! The transports never interpret protocol payloads beyond what is needed to
//! spot a keep-alive `ping`, an `initialize` handshake, and to correlate
//! responses with requests by `id`.

use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Server-defined error used for transport-level rejections
pub const SERVER_ERROR: i64 = -32000;
/// Session referenced by a request no longer exists
pub const SESSION_NOT_FOUND: i64 = -32001;
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INTERNAL_ERROR: i64 = -32603;

/// Method name of a message, if any
pub fn method(message: &Value) -> Option<&str> {
    message.get("method").and_then(Value::as_str)
}

/// The message `id`, or `null` when absent
pub fn request_id(message: &Value) -> Value {
    message.get("id").cloned().unwrap_or(Value::Null)
}

/// Keep-alive check: any body whose `method` is the literal `"ping"`
pub fn is_ping(message: &Value) -> bool {
    method(message) == Some("ping")
}

/// A message expecting a response: carries both `method` and `id`
pub fn is_request(message: &Value) -> bool {
    method(message).is_some() && message.get("id").is_some()
}

/// A message answering a request: carries `id` and `result` or `error`, and no `method`
pub fn is_response(message: &Value) -> bool {
    method(message).is_none()
        && message.get("id").is_some()
        && (message.get("result").is_some() || message.get("error").is_some())
}

/// Protocol handshake request opening a new session.
///
/// Matches a JSON-RPC 2.0 request with method `initialize` whose params
/// carry `protocolVersion`, `capabilities` and a `clientInfo` naming the
/// client `name` and `version`.
pub fn is_initialize_request(message: &Value) -> bool {
    if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return false;
    }
    if method(message) != Some("initialize") || message.get("id").is_none() {
        return false;
    }
    let Some(params) = message.get("params") else {
        return false;
    };
    let client_info_is_valid = params.get("clientInfo").is_some_and(|info| {
        info.get("name").is_some_and(Value::is_string)
            && info.get("version").is_some_and(Value::is_string)
    });
    params.get("protocolVersion").is_some_and(Value::is_string)
        && params.get("capabilities").is_some_and(Value::is_object)
        && client_info_is_valid
}

/// Stable map key for a request id (`1` and `"1"` stay distinct)
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

/// Success envelope answering a keep-alive ping
pub fn ping_envelope(id: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "result": {},
        "id": id,
    })
}

/// Error envelope with the given code and message
pub fn error_envelope(code: i64, message: impl Into<String>, id: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialize(id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        })
    }

    #[test]
    fn test_ping_detection_ignores_id() {
        assert!(is_ping(&json!({"jsonrpc": "2.0", "method": "ping"})));
        assert!(is_ping(&json!({"method": "ping", "id": "abc"})));
        assert!(!is_ping(&json!({"method": "tools/list", "id": 1})));
        assert!(!is_ping(&json!([{"method": "ping", "id": 1}])));
    }

    #[test]
    fn test_ping_envelope_echoes_id() {
        let envelope = ping_envelope(json!(7));
        assert_eq!(envelope, json!({"jsonrpc": "2.0", "result": {}, "id": 7}));
        assert_eq!(ping_envelope(Value::Null)["id"], Value::Null);
    }

    #[test]
    fn test_initialize_predicate() {
        assert!(is_initialize_request(&initialize(json!(1))));

        let mut missing_params = initialize(json!(1));
        missing_params.as_object_mut().unwrap().remove("params");
        assert!(!is_initialize_request(&missing_params));

        let mut notification = initialize(json!(1));
        notification.as_object_mut().unwrap().remove("id");
        assert!(!is_initialize_request(&notification));

        let mut wrong_version = initialize(json!(1));
        wrong_version["jsonrpc"] = json!("1.0");
        assert!(!is_initialize_request(&wrong_version));

        let mut anonymous_client = initialize(json!(1));
        anonymous_client["params"]["clientInfo"] = json!({});
        assert!(!is_initialize_request(&anonymous_client));

        let mut numeric_version = initialize(json!(1));
        numeric_version["params"]["clientInfo"]["version"] = json!(1);
        assert!(!is_initialize_request(&numeric_version));

        assert!(!is_initialize_request(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})));
    }

    #[test]
    fn test_message_classification() {
        let request = json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"});
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = json!({"jsonrpc": "2.0", "id": 3, "result": {}});
        let error = json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -1, "message": "x"}});

        assert!(is_request(&request) && !is_response(&request));
        assert!(!is_request(&notification) && !is_response(&notification));
        assert!(is_response(&response) && is_response(&error));
    }

    #[test]
    fn test_id_key_distinguishes_types() {
        assert_ne!(id_key(&json!(1)), id_key(&json!("1")));
        assert_eq!(request_id(&json!({"method": "x"})), Value::Null);
    }
}
