// ABOUTME: provides runcmd helpers for building and checking run-command requests before sending them.
// ABOUTME: keeps client behavior deterministic by validating locally and folding host events into a result.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use runcmd_common::{
    decode_inbound, validate_request, CommandRequest, InboundMessage, OutboundEvent, SpawnOptions,
    BUILTIN_COMMANDS,
};

/// `<unix-ms>-<uuid>`, unique per request.
pub fn new_request_id() -> String {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{ms}-{}", uuid::Uuid::new_v4())
}

pub fn build_request(
    id: String,
    command: &str,
    args: Vec<String>,
    cwd: Option<String>,
    elevated: bool,
) -> anyhow::Result<CommandRequest> {
    if !BUILTIN_COMMANDS.contains(&command) {
        return Err(anyhow::anyhow!(
            "client refuses {command}: only {} can be run",
            BUILTIN_COMMANDS.join(", ")
        ));
    }

    let request = CommandRequest {
        id,
        command: command.to_string(),
        args,
        options: SpawnOptions {
            cwd,
            ..SpawnOptions::default()
        },
        elevated,
    };
    validate_request(&request).map_err(|e| anyhow::anyhow!(e.message))?;
    Ok(request)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ParseFailed,
    UnknownChannel,
    WrongChannel,
    ValidationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct VerdictError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, serde::Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ValidateVerdict {
    pub ok: bool,
    pub error: Option<VerdictError>,
}

impl ValidateVerdict {
    fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(VerdictError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Judges one `run-command` line the same way the host would before admission.
pub fn validate_verdict(input: &str) -> ValidateVerdict {
    match decode_inbound(input.trim()) {
        Ok(Some(InboundMessage::RunCommand(request))) => match validate_request(&request) {
            Ok(()) => ValidateVerdict { ok: true, error: None },
            Err(err) => ValidateVerdict::failed(ErrorCode::ValidationFailed, err.message),
        },
        Ok(Some(other)) => ValidateVerdict::failed(
            ErrorCode::WrongChannel,
            format!("expected a run-command message, got {other:?}"),
        ),
        Ok(None) => ValidateVerdict::failed(
            ErrorCode::UnknownChannel,
            "channel is outside the boundary and would be ignored",
        ),
        Err(err) => ValidateVerdict::failed(ErrorCode::ParseFailed, err.to_string()),
    }
}

/// How a streamed run ended, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Exited(Option<i32>),
}

impl RunState {
    /// Process exit status for the cli: the remote code, 1 when there is none.
    pub fn exit_status(self) -> i32 {
        match self {
            RunState::Exited(Some(code)) => code,
            RunState::Exited(None) | RunState::Running => 1,
        }
    }
}

/// Copies one host event for request `id` to the given streams. Events for other ids
/// are ignored.
pub fn apply_event<O, E>(
    id: &str,
    event: &OutboundEvent,
    stdout: &mut O,
    stderr: &mut E,
) -> std::io::Result<RunState>
where
    O: Write,
    E: Write,
{
    if event.id() != id {
        return Ok(RunState::Running);
    }
    match event {
        OutboundEvent::CommandStdout(chunk) => {
            stdout.write_all(chunk.data.as_bytes())?;
            stdout.flush()?;
            Ok(RunState::Running)
        }
        OutboundEvent::CommandStderr(chunk) => {
            stderr.write_all(chunk.data.as_bytes())?;
            stderr.flush()?;
            Ok(RunState::Running)
        }
        OutboundEvent::CommandExit(exit) => Ok(RunState::Exited(exit.code)),
        OutboundEvent::Pong(_) => Ok(RunState::Running),
    }
}
