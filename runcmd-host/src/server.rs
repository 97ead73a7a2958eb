// ABOUTME: hosts the unix socket boundary that untrusted ui processes use to request commands.
// ABOUTME: reads newline-delimited messages, ignores unknown channels, and streams events back.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use runcmd_common::{decode_inbound, encode_line, InboundMessage, OutboundEvent, MAX_LINE_BYTES};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::audit::PeerCredentials;
use crate::gateway::{Gateway, Submission};

pub async fn run(socket_path: &str, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        tokio::fs::remove_file(socket_path)
            .await
            .with_context(|| format!("remove existing socket at {socket_path}"))?;
    }

    let listener = UnixListener::bind(socket_path).with_context(|| format!("bind {socket_path}"))?;
    restrict_permissions(socket_path)?;
    log::info!("listening on {socket_path}");

    let dispatcher = gateway.spawn_dispatcher();

    loop {
        let (stream, _addr) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, dispatcher).await {
                log::warn!("connection closed with error: {err:#}");
            }
        });
    }
}

fn restrict_permissions(socket_path: &str) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(socket_path, perms)
        .with_context(|| format!("chmod 0600 {socket_path}"))
}

async fn handle_client(
    stream: UnixStream,
    dispatcher: mpsc::UnboundedSender<Submission>,
) -> anyhow::Result<()> {
    let peer = peer_credentials(&stream);
    log::debug!("client connected: {peer:?}");

    let (read_half, write_half) = stream.into_split();
    // Unbounded: runners never wait on a slow client, so a peer that stops reading while
    // keeping the socket open buffers its children's output here until they exit.
    let (events, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(write_half, events_rx));

    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        match read_line(&mut reader, &mut line).await? {
            LineRead::Eof => break,
            LineRead::TooLong => {
                log::warn!("dropping message larger than {MAX_LINE_BYTES} bytes");
                continue;
            }
            LineRead::Line => {}
        }

        let text = match std::str::from_utf8(&line) {
            Ok(t) => t.trim(),
            Err(_) => {
                log::warn!("dropping message that is not utf-8");
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }

        match decode_inbound(text) {
            Ok(Some(InboundMessage::RunCommand(request))) => {
                log::debug!("[{}] run-command {} {:?}", request.id, request.command, request.args);
                dispatcher
                    .send(Submission {
                        request,
                        peer,
                        events: events.clone(),
                    })
                    .map_err(|_| anyhow::anyhow!("dispatcher stopped"))?;
            }
            Ok(Some(InboundMessage::Ping(ping))) => {
                let _ = events.send(OutboundEvent::Pong(ping));
            }
            Ok(None) => log::debug!("ignoring message on a channel outside the boundary"),
            Err(err) => log::warn!("dropping message: {err}"),
        }
    }

    // Running processes hold their own senders; the writer ends after their exits.
    drop(events);
    writer.await.context("join writer")?
}

enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Reads one `\n`-terminated line into `line` (without the newline), never buffering
/// more than `MAX_LINE_BYTES` of it.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        return Ok(LineRead::Line);
    }
    if line.len() <= MAX_LINE_BYTES {
        return Ok(LineRead::Line);
    }

    line.clear();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
    Ok(LineRead::TooLong)
}

async fn write_events(
    mut writer: OwnedWriteHalf,
    mut events: mpsc::UnboundedReceiver<OutboundEvent>,
) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        let line = encode_line(&event)?;
        if let Err(err) = writer.write_all(&line).await {
            // Nobody is listening any more; running processes are left alone.
            log::debug!("[{}] client went away: {err}", event.id());
            return Ok(());
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(target_os = "linux")]
fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    let mut ucred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut ucred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }
    if len as usize != std::mem::size_of::<libc::ucred>() {
        return None;
    }

    Some(PeerCredentials {
        pid: ucred.pid,
        uid: ucred.uid,
        gid: ucred.gid,
    })
}

#[cfg(not(target_os = "linux"))]
fn peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}
