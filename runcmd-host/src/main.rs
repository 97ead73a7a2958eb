// ABOUTME: runs the trusted host that gates and executes local commands for an untrusted ui.
// ABOUTME: exposes a local unix socket, prompts for consent, and writes an audit log per request.

mod allowlist;
mod audit;
mod consent;
mod elevation;
mod gateway;
mod prompt;
mod quote;
mod runner;
mod server;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runcmd_common::settings::{default_settings_path, ConsentStore};

use crate::allowlist::Allowlist;
use crate::audit::AuditLog;
use crate::consent::ConsentGate;
use crate::gateway::Gateway;
use crate::prompt::PromptBackend;

#[derive(Debug, Parser)]
#[command(name = "runcmd-host")]
struct Args {
    #[arg(long, env = "RUNCMD_SOCKET", default_value = "/tmp/runcmd.sock")]
    socket_path: String,

    #[arg(long, env = "RUNCMD_AUDIT", default_value = "./runcmd-audit.jsonl")]
    audit_path: PathBuf,

    /// Consent settings document (default: <config dir>/Headlamp/settings.json).
    #[arg(long, env = "RUNCMD_SETTINGS")]
    settings_path: Option<PathBuf>,

    /// Without this, every allowlisted request is refused with "Running commands is disabled".
    #[arg(long, env = "RUNCMD_ENABLE_RUN_CMD")]
    enable_run_cmd: bool,

    #[arg(long, env = "RUNCMD_PROMPT", value_enum, default_value_t = PromptBackend::Native)]
    prompt: PromptBackend,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let settings_path = match args.settings_path {
        Some(path) => path,
        None => default_settings_path().context("cannot determine the user config directory")?,
    };
    log::info!("consent settings at {}", settings_path.display());
    if !args.enable_run_cmd {
        log::warn!("running commands is disabled; pass --enable-run-cmd to allow it");
    }

    let gateway = Gateway::new(
        Allowlist::builtin(),
        ConsentGate::new(ConsentStore::new(settings_path), args.prompt.build()),
        elevation::for_platform(std::env::consts::OS),
        AuditLog::new(args.audit_path),
        args.enable_run_cmd,
    );

    server::run(&args.socket_path, Arc::new(gateway)).await
}
