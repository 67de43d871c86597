// JSON-RPC wire messages

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing call: `{"jsonrpc":"2.0","id":N,"method":"...","params":[...]}`
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    /// Serialize as one wire line (without the trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server push message (no id)
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// Any line the server can send
#[derive(Debug)]
pub enum Incoming {
    /// Answer to one of our calls
    Response { id: u64, outcome: Result<Value> },
    /// Unsolicited push
    Notification(Notification),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Classify one inbound line.
pub fn parse_line(line: &str) -> Result<Incoming> {
    let raw: RawMessage = serde_json::from_str(line)?;

    match (raw.id, raw.method) {
        (Some(id), _) if !id.is_null() => {
            let id = id
                .as_u64()
                .ok_or_else(|| Error::Decode(format!("non-integer response id: {}", id)))?;

            let outcome = match raw.error {
                Some(error) if !error.is_null() => Err(rpc_error(error)),
                _ => Ok(raw.result.unwrap_or(Value::Null)),
            };

            Ok(Incoming::Response { id, outcome })
        }
        (_, Some(method)) => Ok(Incoming::Notification(Notification {
            method,
            params: raw.params.unwrap_or(Value::Array(Vec::new())),
        })),
        _ => Err(Error::Decode(format!("message has neither id nor method: {}", line))),
    }
}

/// Map a server error value onto `Error::Protocol`.
/// ElectrumX sends `{"code": N, "message": "..."}`; anything else keeps its text.
fn rpc_error(error: Value) -> Error {
    match error {
        Value::Object(ref map) => {
            let code = map.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Error::Protocol { code, message }
        }
        Value::String(message) => Error::Protocol { code: -1, message },
        other => Error::Protocol {
            code: -1,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line() {
        let params = [json!("abc"), json!(true)];
        let line = Request::new(7, "blockchain.transaction.get", &params).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "blockchain.transaction.get");
        assert_eq!(value["params"], json!(["abc", true]));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_parse_response() {
        match parse_line(r#"{"jsonrpc":"2.0","id":3,"result":{"confirmed":5}}"#).unwrap() {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, 3);
                assert_eq!(outcome.unwrap()["confirmed"], 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_null_result() {
        match parse_line(r#"{"id":4,"result":null}"#).unwrap() {
            Incoming::Response { outcome, .. } => assert_eq!(outcome.unwrap(), Value::Null),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_object() {
        let line = r#"{"id":9,"error":{"code":-32601,"message":"unknown method"}}"#;
        match parse_line(line).unwrap() {
            Incoming::Response { id, outcome } => {
                assert_eq!(id, 9);
                match outcome {
                    Err(Error::Protocol { code, message }) => {
                        assert_eq!(code, -32601);
                        assert_eq!(message, "unknown method");
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"blockchain.headers.subscribe","params":[{"height":5,"hex":"00"}]}"#;
        match parse_line(line).unwrap() {
            Incoming::Notification(n) => {
                assert_eq!(n.method, "blockchain.headers.subscribe");
                assert_eq!(n.params[0]["height"], 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_line("not json"), Err(Error::Decode(_))));
        assert!(matches!(parse_line(r#"{"result":1}"#), Err(Error::Decode(_))));
        assert!(matches!(parse_line(r#"{"id":"abc","result":1}"#), Err(Error::Decode(_))));
    }
}
