//! Operator commands accepted by the control plane.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send `content` to one known peer.
    Send { pid: String, content: Vec<u8> },
    /// Send `content` to every known peer.
    Spread { content: Vec<u8> },
    /// Announce ourselves to the peer at `address`.
    Join { address: String },
}

#[derive(Debug, Deserialize)]
struct SendPayload {
    #[serde(alias = "identity")]
    pid: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    address: String,
}

impl Command {
    /// Build a command from its name and raw request body.
    ///
    /// `send` and `join` take JSON bodies; `spread` uses the body as-is.
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self> {
        match kind {
            "send" => {
                let payload: SendPayload = from_json(body)?;
                Ok(Command::Send {
                    pid: payload.pid,
                    content: payload.content.into_bytes(),
                })
            }
            "spread" => Ok(Command::Spread {
                content: body.to_vec(),
            }),
            "join" => {
                let payload: JoinPayload = from_json(body)?;
                Ok(Command::Join {
                    address: payload.address,
                })
            }
            other => Err(Error::UnsupportedCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Send { .. } => "send",
            Command::Spread { .. } => "spread",
            Command::Join { .. } => "join",
        }
    }
}

fn from_json<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidCommand(e.to_string()))
}

/// Per-peer result of a spread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadReport {
    pub pid: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<(String, Result<()>)> for SpreadReport {
    fn from((pid, result): (String, Result<()>)) -> Self {
        Self {
            pid,
            ok: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Sent,
    Spread(Vec<SpreadReport>),
    JoinSent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cmd = Command::parse("send", br#"{"pid":"b","content":"hello"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Send {
                pid: "b".into(),
                content: b"hello".to_vec()
            }
        );
        assert_eq!(cmd.name(), "send");
    }

    #[test]
    fn test_parse_send_identity_alias() {
        let cmd = Command::parse("send", br#"{"identity":"b","content":""}"#).unwrap();
        assert!(matches!(cmd, Command::Send { pid, .. } if pid == "b"));
    }

    #[test]
    fn test_parse_spread_takes_raw_body() {
        let cmd = Command::parse("spread", b"not json at all").unwrap();
        assert_eq!(
            cmd,
            Command::Spread {
                content: b"not json at all".to_vec()
            }
        );
    }

    #[test]
    fn test_parse_join() {
        let cmd = Command::parse("join", br#"{"address":"10.0.0.1:7946"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Join {
                address: "10.0.0.1:7946".into()
            }
        );
    }

    #[test]
    fn test_parse_bad_body() {
        let err = Command::parse("send", br#"{"pid":"b"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
        let err = Command::parse("join", b"").unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[test]
    fn test_parse_unsupported() {
        let err = Command::parse("leave", b"{}").unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand(kind) if kind == "leave"));
    }

    #[test]
    fn test_spread_report_from_result() {
        let ok = SpreadReport::from(("b".to_string(), Ok(())));
        assert!(ok.ok && ok.error.is_none());

        let failed = SpreadReport::from(("c".to_string(), Err(Error::PeerUnknown("c".into()))));
        assert!(!failed.ok);
        assert!(failed.error.unwrap().contains("c"));
    }
}
