// ABOUTME: defines the message protocol shared by the runcmd host and its clients.
// ABOUTME: decodes inbound lines into a closed set of channels and validates command requests.

pub mod settings;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Program names the host will ever run. Fixed at build time.
pub const BUILTIN_COMMANDS: &[&str] = &["minikube", "az"];

/// Upper bound for one newline-delimited message on the socket.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    RunCommand,
    Ping,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::RunCommand, Channel::Ping];

    pub fn name(self) -> &'static str {
        match self {
            Channel::RunCommand => "run-command",
            Channel::Ping => "ping",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Everything the untrusted side may send. Anything else is inert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(tag = "channel", rename_all = "kebab-case")]
pub enum InboundMessage {
    RunCommand(CommandRequest),
    Ping(PingRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CommandRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: SpawnOptions,
    #[serde(default)]
    pub elevated: bool,
}

/// Spawn settings forwarded with a request. Only `cwd` and `env` are honored; any other
/// key (`shell` included) is kept in `ignored` so the host can log it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
pub struct SpawnOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub ignored: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PingRequest {
    pub id: String,
}

/// Everything the host sends back, tagged with the request id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(tag = "channel", rename_all = "kebab-case")]
pub enum OutboundEvent {
    CommandStdout(OutputChunk),
    CommandStderr(OutputChunk),
    CommandExit(CommandExit),
    Pong(PingRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputChunk {
    pub id: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CommandExit {
    pub id: String,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl OutboundEvent {
    pub fn stdout(id: &str, data: impl Into<String>) -> Self {
        OutboundEvent::CommandStdout(OutputChunk {
            id: id.to_string(),
            data: data.into(),
        })
    }

    pub fn stderr(id: &str, data: impl Into<String>) -> Self {
        OutboundEvent::CommandStderr(OutputChunk {
            id: id.to_string(),
            data: data.into(),
        })
    }

    pub fn exit(id: &str, code: Option<i32>) -> Self {
        OutboundEvent::CommandExit(CommandExit {
            id: id.to_string(),
            code,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            OutboundEvent::CommandStdout(c) | OutboundEvent::CommandStderr(c) => &c.id,
            OutboundEvent::CommandExit(e) => &e.id,
            OutboundEvent::Pong(p) => &p.id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not a json object: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("message has no channel")]
    MissingChannel,
    #[error("invalid {channel} message: {source}")]
    Invalid {
        channel: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one inbound line. `Ok(None)` means the line names a channel outside the
/// boundary and must be ignored.
pub fn decode_inbound(line: &str) -> Result<Option<InboundMessage>, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(DecodeError::Malformed)?;
    let name = value
        .get("channel")
        .and_then(|c| c.as_str())
        .ok_or(DecodeError::MissingChannel)?;

    let channel = match Channel::from_name(name) {
        Some(c) => c,
        None => return Ok(None),
    };

    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| DecodeError::Invalid {
            channel: channel.name(),
            source,
        })
}

pub fn decode_outbound(line: &str) -> Result<OutboundEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serializes a message as one protocol line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

pub fn validate_request(request: &CommandRequest) -> Result<(), ValidationError> {
    if request.id.trim().is_empty() {
        return Err(ValidationError::new("id must be non-empty"));
    }
    if request.command.trim().is_empty() {
        return Err(ValidationError::new("command must be non-empty"));
    }
    if request.command.contains(['/', '\\']) {
        return Err(ValidationError::new("command must be a bare program name"));
    }
    if request.args.iter().any(|a| a.contains('\0')) {
        return Err(ValidationError::new("args must not contain NUL bytes"));
    }
    if let Some(cwd) = &request.options.cwd {
        if cwd.trim().is_empty() {
            return Err(ValidationError::new("options.cwd must be non-empty when present"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_run_command_with_defaults() {
        let line = r#"{"channel":"run-command","id":"req-1","command":"minikube"}"#;
        let msg = decode_inbound(line).unwrap().unwrap();
        match msg {
            InboundMessage::RunCommand(req) => {
                assert_eq!(req.id, "req-1");
                assert_eq!(req.command, "minikube");
                assert!(req.args.is_empty());
                assert!(!req.elevated);
                assert_eq!(req.options, SpawnOptions::default());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_fields_in_run_command() {
        let line = r#"{"channel":"run-command","id":"req-1","command":"az","sudo":true}"#;
        let err = decode_inbound(line).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { channel: "run-command", .. }));
    }

    #[test]
    fn unknown_channel_is_inert() {
        let line = r#"{"channel":"open-external","url":"https://example.com"}"#;
        assert!(decode_inbound(line).unwrap().is_none());
    }

    #[test]
    fn missing_channel_is_an_error() {
        let err = decode_inbound(r#"{"id":"x"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingChannel));
    }

    #[test]
    fn unrecognized_options_are_collected_not_honored() {
        let line = r#"{"channel":"run-command","id":"r","command":"az","options":{"cwd":"/tmp","shell":true}}"#;
        let Some(InboundMessage::RunCommand(req)) = decode_inbound(line).unwrap() else {
            panic!("expected run-command");
        };
        assert_eq!(req.options.cwd.as_deref(), Some("/tmp"));
        assert_eq!(req.options.ignored.get("shell"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn outbound_events_use_renderer_channel_names() {
        let out = serde_json::to_value(OutboundEvent::stdout("a", "hi")).unwrap();
        assert_eq!(out["channel"], "command-stdout");
        let err = serde_json::to_value(OutboundEvent::stderr("a", "oops")).unwrap();
        assert_eq!(err["channel"], "command-stderr");
        let exit = serde_json::to_value(OutboundEvent::exit("a", None)).unwrap();
        assert_eq!(exit["channel"], "command-exit");
        assert!(exit["code"].is_null());
    }

    #[test]
    fn encoded_line_decodes_back() {
        let line = encode_line(&OutboundEvent::exit("req-9", Some(3))).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let text = std::str::from_utf8(&line).unwrap();
        let event = decode_outbound(text.trim_end()).unwrap();
        assert_eq!(event.id(), "req-9");
        assert_eq!(event, OutboundEvent::exit("req-9", Some(3)));
    }

    #[test]
    fn validation_rejects_blank_id_and_paths() {
        let mut req = CommandRequest {
            id: "  ".to_string(),
            command: "minikube".to_string(),
            args: vec![],
            options: SpawnOptions::default(),
            elevated: false,
        };
        assert_eq!(validate_request(&req).unwrap_err().message, "id must be non-empty");

        req.id = "req-1".to_string();
        req.command = "/usr/bin/minikube".to_string();
        assert_eq!(
            validate_request(&req).unwrap_err().message,
            "command must be a bare program name"
        );

        req.command = "minikube".to_string();
        req.args = vec!["status".to_string()];
        validate_request(&req).unwrap();
    }
}
