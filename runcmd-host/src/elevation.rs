// ABOUTME: rewrites an allowlisted command into a platform-specific privileged invocation.
// ABOUTME: one strategy per platform, chosen once at startup; linux helpers are probed in order.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::quote;

/// Graphical privilege front-ends, most preferred first.
pub const LINUX_HELPERS: &[&str] = &["pkexec", "gksudo", "kdesudo"];
pub const LINUX_FALLBACK: &str = "sudo";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait ElevationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation;
}

pub fn for_platform(os: &str) -> Arc<dyn ElevationStrategy> {
    match os {
        "windows" => Arc::new(WindowsElevation),
        "macos" => Arc::new(MacElevation),
        "linux" => Arc::new(LinuxElevation::new()),
        _ => Arc::new(SudoElevation),
    }
}

/// `Start-Process -Verb RunAs` through PowerShell. Only the exit code comes back; the
/// elevated window's output is not captured.
pub struct WindowsElevation;

pub fn windows_script(command: &str, args: &[String]) -> String {
    let mut script = format!("$p = Start-Process -FilePath {}", quote::powershell(command));
    if !args.is_empty() {
        let list = args
            .iter()
            .map(|a| quote::powershell(&quote::msvc_arg(a)))
            .collect::<Vec<_>>()
            .join(", ");
        script.push_str(&format!(" -ArgumentList @({list})"));
    }
    script.push_str(" -Verb RunAs -WindowStyle Hidden -Wait -PassThru; exit $p.ExitCode");
    script
}

#[async_trait]
impl ElevationStrategy for WindowsElevation {
    fn name(&self) -> &'static str {
        "powershell-runas"
    }

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation {
        Invocation {
            program: "powershell.exe".to_string(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                windows_script(command, args),
            ],
        }
    }
}

/// AppleScript `do shell script ... with administrator privileges`. That shell starts
/// with a fixed `/usr/bin:/bin:/usr/sbin:/sbin`, so the host's PATH is exported first.
pub struct MacElevation;

pub fn mac_script(command: &str, args: &[String], path: Option<&str>) -> String {
    let command_line = quote::command_line(command, args);
    let shell = match path.filter(|p| !p.is_empty()) {
        Some(path) => format!("export PATH={}; {command_line}", quote::posix(path)),
        None => command_line,
    };
    format!(
        "do shell script {} with administrator privileges",
        quote::applescript(&shell)
    )
}

#[async_trait]
impl ElevationStrategy for MacElevation {
    fn name(&self) -> &'static str {
        "osascript"
    }

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation {
        Invocation {
            program: "osascript".to_string(),
            args: vec![
                "-e".to_string(),
                mac_script(command, args, std::env::var("PATH").ok().as_deref()),
            ],
        }
    }
}

/// First installed graphical helper, else plain `sudo`. Without a terminal `sudo`
/// usually cannot ask for a password, so that path tends to fail.
pub struct LinuxElevation {
    candidates: Vec<String>,
    selected: OnceCell<String>,
}

impl LinuxElevation {
    pub fn new() -> Self {
        Self::with_candidates(LINUX_HELPERS.iter().copied())
    }

    pub fn with_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            selected: OnceCell::new(),
        }
    }

    pub async fn helper(&self) -> &str {
        self.selected
            .get_or_init(|| async {
                let helper = probe_first(&self.candidates)
                    .await
                    .unwrap_or_else(|| LINUX_FALLBACK.to_string());
                log::info!("elevation helper: {helper}");
                helper
            })
            .await
    }
}

impl Default for LinuxElevation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElevationStrategy for LinuxElevation {
    fn name(&self) -> &'static str {
        "linux-helper"
    }

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation {
        let program = self.helper().await.to_string();
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command.to_string());
        argv.extend(args.iter().cloned());
        Invocation {
            program,
            args: argv,
        }
    }
}

pub struct SudoElevation;

#[async_trait]
impl ElevationStrategy for SudoElevation {
    fn name(&self) -> &'static str {
        "sudo"
    }

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation {
        let mut argv = vec![command.to_string()];
        argv.extend(args.iter().cloned());
        Invocation {
            program: LINUX_FALLBACK.to_string(),
            args: argv,
        }
    }
}

pub async fn probe_first(candidates: &[String]) -> Option<String> {
    for candidate in candidates {
        if probe(candidate).await {
            return Some(candidate.clone());
        }
        log::debug!("elevation helper {candidate} not available");
    }
    None
}

/// A helper exists if `<helper> --version` can be spawned; its exit status is irrelevant.
async fn probe(program: &str) -> bool {
    let child = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    match child {
        Ok(mut child) => {
            let _ = tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await;
            true
        }
        Err(_) => false,
    }
}
