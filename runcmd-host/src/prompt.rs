// ABOUTME: asks the user, through a blocking native dialog, whether a command may run.
// ABOUTME: the dialog is an awaited future so callers see exactly where the host suspends.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::quote;

pub const CONSENT_TITLE: &str = "Consent to command being run";
pub const CONSENT_MESSAGE: &str = "Allow this local command to be executed? Your choice will be saved.";
pub const CONSENT_ALLOW: &str = "Allow";
pub const CONSENT_DENY: &str = "Deny";

pub const ELEVATION_TITLE: &str = "Administrator privileges requested";
pub const ELEVATION_MESSAGE: &str = "This command asks to run with administrator privileges.";
pub const ELEVATION_ALLOW: &str = "Run with privileges";
pub const ELEVATION_DENY: &str = "Cancel";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("dialog unavailable: {0}")]
    Unavailable(String),
    #[error("dialog helper failed: {0}")]
    Helper(#[from] std::io::Error),
}

#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// `Ok(true)` only when the user picked "Allow". Closing the dialog counts as "Deny".
    async fn confirm_command(&self, command: &str, args: &[String]) -> Result<bool, PromptError>;

    async fn confirm_elevation(&self, command: &str, args: &[String]) -> Result<bool, PromptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PromptBackend {
    /// Platform dialog (zenity/kdialog, osascript, PowerShell).
    Native,
    /// Answer every prompt with "Deny" without showing anything.
    DenyAll,
}

impl PromptBackend {
    pub fn build(self) -> Arc<dyn ConsentPrompt> {
        match self {
            PromptBackend::Native => Arc::new(NativePrompt::for_platform(std::env::consts::OS)),
            PromptBackend::DenyAll => Arc::new(DenyAllPrompt),
        }
    }
}

pub struct DenyAllPrompt;

#[async_trait]
impl ConsentPrompt for DenyAllPrompt {
    async fn confirm_command(&self, command: &str, _args: &[String]) -> Result<bool, PromptError> {
        log::info!("deny-all prompt: refusing {command}");
        Ok(false)
    }

    async fn confirm_elevation(&self, command: &str, _args: &[String]) -> Result<bool, PromptError> {
        log::info!("deny-all prompt: refusing elevation of {command}");
        Ok(false)
    }
}

struct Dialog<'a> {
    title: &'a str,
    message: &'a str,
    detail: String,
    accept: &'a str,
    reject: &'a str,
}

impl Dialog<'_> {
    fn text(&self) -> String {
        format!("{}\n\n{}", self.message, self.detail)
    }
}

pub struct NativePrompt {
    os: &'static str,
}

impl NativePrompt {
    pub fn for_platform(os: &'static str) -> Self {
        Self { os }
    }

    async fn show(&self, dialog: Dialog<'_>) -> Result<bool, PromptError> {
        match self.os {
            "linux" | "freebsd" | "openbsd" | "netbsd" => show_x11(&dialog).await,
            "macos" => show_osascript("osascript", &dialog).await,
            "windows" => show_message_box(&dialog).await,
            other => Err(PromptError::Unavailable(format!("no dialog support on {other}"))),
        }
    }
}

#[async_trait]
impl ConsentPrompt for NativePrompt {
    async fn confirm_command(&self, command: &str, args: &[String]) -> Result<bool, PromptError> {
        self.show(Dialog {
            title: CONSENT_TITLE,
            message: CONSENT_MESSAGE,
            detail: quote::command_line(command, args),
            accept: CONSENT_ALLOW,
            reject: CONSENT_DENY,
        })
        .await
    }

    async fn confirm_elevation(&self, command: &str, args: &[String]) -> Result<bool, PromptError> {
        self.show(Dialog {
            title: ELEVATION_TITLE,
            message: ELEVATION_MESSAGE,
            detail: quote::command_line(command, args),
            accept: ELEVATION_ALLOW,
            reject: ELEVATION_DENY,
        })
        .await
    }
}

/// Runs a dialog helper to completion. `Ok(None)` when the helper is not installed.
async fn run_helper(program: &str, args: &[String]) -> Result<Option<std::process::Output>, PromptError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(out) => Ok(Some(out)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PromptError::Helper(err)),
    }
}

/// Exit code 0 accepts, 1 rejects (or the window was closed); anything else is a failure.
fn answer_from_status(program: &str, status: std::process::ExitStatus) -> Result<bool, PromptError> {
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(PromptError::Unavailable(format!("{program} exited with {status}"))),
    }
}

async fn show_x11(dialog: &Dialog<'_>) -> Result<bool, PromptError> {
    if std::env::var_os("DISPLAY").is_none() && std::env::var_os("WAYLAND_DISPLAY").is_none() {
        return Err(PromptError::Unavailable("no graphical display".to_string()));
    }

    let zenity = vec![
        "--question".to_string(),
        "--no-markup".to_string(),
        format!("--title={}", dialog.title),
        format!("--text={}", dialog.text()),
        format!("--ok-label={}", dialog.accept),
        format!("--cancel-label={}", dialog.reject),
    ];
    if let Some(out) = run_helper("zenity", &zenity).await? {
        return answer_from_status("zenity", out.status);
    }

    let kdialog = vec![
        "--title".to_string(),
        dialog.title.to_string(),
        "--yes-label".to_string(),
        dialog.accept.to_string(),
        "--no-label".to_string(),
        dialog.reject.to_string(),
        "--yesno".to_string(),
        dialog.text(),
    ];
    if let Some(out) = run_helper("kdialog", &kdialog).await? {
        return answer_from_status("kdialog", out.status);
    }

    Err(PromptError::Unavailable("neither zenity nor kdialog is installed".to_string()))
}

const USER_CANCELED: &str = "(-128)";

async fn show_osascript(program: &str, dialog: &Dialog<'_>) -> Result<bool, PromptError> {
    let script = format!(
        "display dialog {} with title {} buttons {{{}, {}}} default button {} cancel button {} with icon caution",
        quote::applescript(&dialog.text()),
        quote::applescript(dialog.title),
        quote::applescript(dialog.reject),
        quote::applescript(dialog.accept),
        quote::applescript(dialog.accept),
        quote::applescript(dialog.reject),
    );
    let out = run_helper(program, &["-e".to_string(), script])
        .await?
        .ok_or_else(|| PromptError::Unavailable(format!("{program} not found")))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains(USER_CANCELED) {
            return Ok(false);
        }
        return Err(PromptError::Unavailable(format!(
            "{program} exited with {}: {}",
            out.status,
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout.contains(&format!("button returned:{}", dialog.accept)))
}

async fn show_message_box(dialog: &Dialog<'_>) -> Result<bool, PromptError> {
    let text = format!(
        "{}\n\nYes = {}, No = {}",
        dialog.text(),
        dialog.accept,
        dialog.reject
    );
    let script = format!(
        "Add-Type -AssemblyName PresentationFramework; \
         $r = [System.Windows.MessageBox]::Show({}, {}, 'YesNo', 'Question'); \
         if ($r -eq 'Yes') {{ exit 0 }} else {{ exit 1 }}",
        quote::powershell(&text),
        quote::powershell(dialog.title),
    );
    let args = vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
        script,
    ];
    let out = run_helper("powershell.exe", &args)
        .await?
        .ok_or_else(|| PromptError::Unavailable("powershell.exe not found".to_string()))?;
    answer_from_status("powershell.exe", out.status)
}
