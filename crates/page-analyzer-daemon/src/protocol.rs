//! Message parsing and formatting for the daemon socket protocol.
//!
//! Messages are newline-delimited JSON over a Unix domain socket. A request
//! carries a client-chosen `id` and a facade command; events are pushed to
//! every connection without an `id`.

use anyhow::{anyhow, Result};
use page_analyzer::AnalyzerEvent;
use serde_json::{json, Value};

pub const E_INVALID_JSON: &str = "E_INVALID_JSON";
pub const E_INVALID_PARAMS: &str = "E_INVALID_PARAMS";
pub const E_MESSAGE_TOO_LARGE: &str = "E_MESSAGE_TOO_LARGE";
pub const E_INTERNAL: &str = "E_INTERNAL";

/// A parsed protocol request.
#[derive(Debug)]
pub struct Request {
    pub id: String,
    pub command: Value,
}

/// Parse a JSON request line.
pub fn parse_request(json: &str) -> Result<Request> {
    let v: Value = serde_json::from_str(json)?;

    let id = v
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let command = v
        .get("command")
        .cloned()
        .ok_or_else(|| anyhow!("missing 'command' field"))?;

    Ok(Request { id, command })
}

/// Format a successful response (newline-terminated).
pub fn format_response(id: &str, result: Value) -> String {
    let resp = json!({
        "id": id,
        "result": result,
    });
    format!("{resp}\n")
}

/// Format an error response (newline-terminated).
pub fn format_error(id: &str, code: &str, message: &str) -> String {
    let resp = json!({
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    });
    format!("{resp}\n")
}

/// Response to a command whose type the facade does not know.
pub fn format_ignored(id: &str) -> String {
    let resp = json!({
        "id": id,
        "result": Value::Null,
        "ignored": true,
    });
    format!("{resp}\n")
}

/// Format a pushed event (newline-terminated).
pub fn format_event(event: &AnalyzerEvent) -> Result<String> {
    let resp = json!({ "event": serde_json::to_value(event)? });
    Ok(format!("{resp}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_analyzer::{RuntimeTotals, SurfaceId};

    #[test]
    fn test_parse_request() {
        let json = r#"{"id": "r1", "command": {"type": "getStatus"}}"#;
        let req = parse_request(json).unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.command["type"], "getStatus");
    }

    #[test]
    fn test_parse_request_without_id() {
        let req = parse_request(r#"{"command": {"type": "listRuns"}}"#).unwrap();
        assert_eq!(req.id, "unknown");
    }

    #[test]
    fn test_parse_request_without_command() {
        assert!(parse_request(r#"{"id": "x"}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn test_format_response() {
        let resp = format_response("r1", json!({"active": false}));
        assert!(resp.ends_with('\n'));
        let parsed: Value = serde_json::from_str(resp.trim()).unwrap();
        assert_eq!(parsed["id"], "r1");
        assert_eq!(parsed["result"]["active"], false);
    }

    #[test]
    fn test_format_error() {
        let resp = format_error("r2", "E_RUNTIME_INACTIVE", "Runtime scan is not active");
        let parsed: Value = serde_json::from_str(resp.trim()).unwrap();
        assert_eq!(parsed["error"]["code"], "E_RUNTIME_INACTIVE");
        assert!(parsed.get("result").is_none());
    }

    #[test]
    fn test_format_ignored() {
        let parsed: Value = serde_json::from_str(format_ignored("r3").trim()).unwrap();
        assert_eq!(parsed["ignored"], true);
        assert!(parsed["result"].is_null());
    }

    #[test]
    fn test_format_event() {
        let event = AnalyzerEvent::RuntimeUpdate {
            origin: None,
            totals: RuntimeTotals {
                total_scans: 0,
                pages_count: 0,
                started_at: 1,
            },
        };
        let parsed: Value = serde_json::from_str(format_event(&event).unwrap().trim()).unwrap();
        assert_eq!(parsed["event"]["type"], "runtimeUpdate");
        assert!(parsed["event"]["origin"].is_null());
        assert!(parsed.get("id").is_none());

        let event = AnalyzerEvent::ScanError {
            surface_id: SurfaceId::new("3"),
            reason: "denied".to_string(),
        };
        let parsed: Value = serde_json::from_str(format_event(&event).unwrap().trim()).unwrap();
        assert_eq!(parsed["event"]["surfaceId"], "3");
    }
}
