// ABOUTME: provides a user-facing cli for running allowlisted commands through the local runcmd host.
// ABOUTME: streams command output back and edits the consent settings the host reads.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use runcmd_common::settings::{default_settings_path, ConsentStore};
use runcmd_common::{
    decode_outbound, encode_line, CommandRequest, InboundMessage, OutboundEvent, PingRequest,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use runcmd::{apply_event, build_request, new_request_id, validate_verdict, RunState};

#[derive(Debug, Parser)]
#[command(name = "runcmd")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run {
        #[arg(long, env = "RUNCMD_SOCKET", default_value = "/tmp/runcmd.sock")]
        socket_path: String,

        #[arg(long)]
        elevated: bool,

        #[arg(long)]
        cwd: Option<String>,

        command: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Ping {
        #[arg(long, env = "RUNCMD_SOCKET", default_value = "/tmp/runcmd.sock")]
        socket_path: String,
    },
    Validate {
        #[arg(long)]
        file: Option<String>,

        #[arg(long)]
        json: Option<String>,
    },
    Consent {
        #[arg(long, env = "RUNCMD_SETTINGS")]
        settings_path: Option<PathBuf>,

        #[command(subcommand)]
        action: ConsentAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConsentAction {
    List,
    Allow { command: String },
    Deny { command: String },
    Forget { command: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            socket_path,
            elevated,
            cwd,
            command,
            args,
        } => {
            let request = build_request(new_request_id(), &command, args, cwd, elevated)?;
            let status = run(&socket_path, request).await?;
            std::process::exit(status);
        }
        Command::Ping { socket_path } => {
            let id = new_request_id();
            let ping = InboundMessage::Ping(PingRequest { id: id.clone() });
            let events = exchange(&socket_path, &ping).await?;
            match events.iter().find(|e| matches!(e, OutboundEvent::Pong(p) if p.id == id)) {
                Some(pong) => println!("{}", serde_json::to_string(pong)?),
                None => return Err(anyhow::anyhow!("host closed the connection without a pong")),
            }
        }
        Command::Validate { file, json } => {
            let input = read_input(file.as_deref(), json.as_deref()).await?;
            let verdict = validate_verdict(&input);
            print!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Consent {
            settings_path,
            action,
        } => {
            let path = match settings_path {
                Some(p) => p,
                None => default_settings_path().context("cannot determine the user config directory")?,
            };
            consent(&ConsentStore::new(path), action)?;
        }
    }

    Ok(())
}

async fn read_input(file: Option<&str>, json: Option<&str>) -> anyhow::Result<String> {
    if let Some(json) = json {
        return Ok(json.to_string());
    }

    if let Some(file) = file {
        return Ok(tokio::fs::read_to_string(file).await?);
    }

    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    Ok(input)
}

async fn connect(socket_path: &str, message: &InboundMessage) -> anyhow::Result<UnixStream> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect to {socket_path}"))?;
    stream.write_all(&encode_line(message)?).await?;
    // The host keeps the connection open until every run it started has exited.
    stream.shutdown().await?;
    Ok(stream)
}

async fn run(socket_path: &str, request: CommandRequest) -> anyhow::Result<i32> {
    let id = request.id.clone();
    let stream = connect(socket_path, &InboundMessage::RunCommand(request)).await?;
    let mut lines = BufReader::new(stream).lines();

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    while let Some(line) = lines.next_line().await? {
        let event = match decode_outbound(&line) {
            Ok(e) => e,
            Err(err) => {
                log::warn!("ignoring unreadable event from host: {err}");
                continue;
            }
        };
        if let RunState::Exited(code) = apply_event(&id, &event, &mut stdout, &mut stderr)? {
            return Ok(RunState::Exited(code).exit_status());
        }
    }

    log::error!("[{id}] host closed the connection without an exit; the request was dropped");
    Ok(RunState::Running.exit_status())
}

async fn exchange(socket_path: &str, message: &InboundMessage) -> anyhow::Result<Vec<OutboundEvent>> {
    let stream = connect(socket_path, message).await?;
    let mut lines = BufReader::new(stream).lines();
    let mut events = Vec::new();
    while let Some(line) = lines.next_line().await? {
        events.push(decode_outbound(&line)?);
    }
    Ok(events)
}

fn consent(store: &ConsentStore, action: ConsentAction) -> anyhow::Result<()> {
    let path = store.path().display().to_string();
    match action {
        ConsentAction::List => {
            let settings = store.load();
            println!("{}", serde_json::to_string_pretty(&settings.confirmed_commands)?);
        }
        ConsentAction::Allow { command } => {
            store.record(&command, true).with_context(|| format!("write {path}"))?;
            println!("{command}: always allow");
        }
        ConsentAction::Deny { command } => {
            store.record(&command, false).with_context(|| format!("write {path}"))?;
            println!("{command}: always deny");
        }
        ConsentAction::Forget { command } => {
            if store.forget(&command).with_context(|| format!("write {path}"))? {
                println!("{command}: will ask again");
            } else {
                println!("{command}: no saved choice");
            }
        }
    }
    Ok(())
}
