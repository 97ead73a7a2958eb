// ABOUTME: spawns an admitted command without a shell and streams its output as protocol events.
// ABOUTME: guarantees that the exit event is the last event emitted for a request id.

use std::process::Stdio;

use runcmd_common::{OutboundEvent, SpawnOptions};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

const CHUNK_BYTES: usize = 8192;

/// Per-connection event queue; its order is the order the renderer sees.
pub type EventSink = mpsc::UnboundedSender<OutboundEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    SpawnFailed(String),
    Exited(Option<i32>),
}

impl RunOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::SpawnFailed(_) => Some(1),
            RunOutcome::Exited(code) => *code,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn event(self, id: &str, data: String) -> OutboundEvent {
        match self {
            Stream::Stdout => OutboundEvent::stdout(id, data),
            Stream::Stderr => OutboundEvent::stderr(id, data),
        }
    }
}

pub async fn run(
    id: &str,
    program: &str,
    args: &[String],
    options: &SpawnOptions,
    events: &EventSink,
) -> RunOutcome {
    for key in options.ignored.keys() {
        log::warn!("[{id}] ignoring unsupported spawn option {key:?}");
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }

    if let Some(env) = &options.env {
        cmd.envs(env);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let message = format!("failed to start {program}: {err}");
            log::error!("[{id}] {message}");
            let _ = events.send(OutboundEvent::stderr(id, message.clone()));
            let _ = events.send(OutboundEvent::exit(id, Some(1)));
            return RunOutcome::SpawnFailed(message);
        }
    };
    log::info!("[{id}] started {program} (pid {:?})", child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(
        forward(stdout, id, Stream::Stdout, events),
        forward(stderr, id, Stream::Stderr, events),
    );

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(err) => {
            log::error!("[{id}] waiting for {program} failed: {err}");
            None
        }
    };
    log::info!("[{id}] {program} exited with {code:?}");
    let _ = events.send(OutboundEvent::exit(id, code));
    RunOutcome::Exited(code)
}

async fn forward<R>(reader: Option<R>, id: &str, stream: Stream, events: &EventSink)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                log::warn!("[{id}] reading {stream:?} failed: {err}");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);
        if let Some(text) = take_utf8(&mut pending) {
            let _ = events.send(stream.event(id, text));
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = events.send(stream.event(id, text));
    }
}

/// Drains `pending` up to its last character boundary, keeping a trailing incomplete UTF-8
/// sequence for the next read. Invalid bytes are replaced.
fn take_utf8(pending: &mut Vec<u8>) -> Option<String> {
    let keep_from = incomplete_tail(pending);
    if keep_from == 0 {
        return None;
    }
    let rest = pending.split_off(keep_from);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    Some(text)
}

fn incomplete_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}
