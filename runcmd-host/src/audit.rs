// ABOUTME: writes append-only audit records for every command request that reaches a terminal state.
// ABOUTME: structured json lines; environment values are redacted and output is never recorded.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use runcmd_common::{CommandRequest, SpawnOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Dropped,
    Disabled,
    Denied,
    PromptUnavailable,
    SpawnFailed,
    Exited,
}

pub struct AuditEntry<'a> {
    pub peer: Option<PeerCredentials>,
    pub request: &'a CommandRequest,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub message: Option<&'a str>,
}

#[derive(Debug, serde::Serialize)]
struct AuditRecord<'a> {
    ts_unix_ms: u64,
    peer: Option<PeerCredentials>,
    id: &'a str,
    command: &'a str,
    args: &'a [String],
    elevated: bool,
    options: serde_json::Value,
    outcome: Outcome,
    exit_code: Option<i32>,
    message: Option<&'a str>,
}

pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, entry: AuditEntry<'_>) -> anyhow::Result<()> {
        let request = entry.request;
        let record = AuditRecord {
            ts_unix_ms: now_unix_ms(),
            peer: entry.peer,
            id: &request.id,
            command: &request.command,
            args: &request.args,
            elevated: request.elevated,
            options: redact_options(&request.options)?,
            outcome: entry.outcome,
            exit_code: entry.exit_code,
            message: entry.message,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open audit log at {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn redact_options(options: &SpawnOptions) -> anyhow::Result<serde_json::Value> {
    let mut v = serde_json::to_value(options)?;
    if let Some(env) = v.get_mut("env").and_then(|e| e.as_object_mut()) {
        for (_, value) in env.iter_mut() {
            *value = serde_json::Value::String("[redacted]".to_string());
        }
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CommandRequest {
        let mut options = SpawnOptions {
            cwd: Some("/tmp".to_string()),
            ..SpawnOptions::default()
        };
        options.env = Some([("AZURE_TOKEN".to_string(), "secret".to_string())].into());
        CommandRequest {
            id: "req-1".to_string(),
            command: "az".to_string(),
            args: vec!["login".to_string()],
            options,
            elevated: true,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_entry_with_redacted_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path);
        let req = request();

        log.append(AuditEntry {
            peer: Some(PeerCredentials { pid: 1, uid: 2, gid: 3 }),
            request: &req,
            outcome: Outcome::Denied,
            exit_code: Some(1),
            message: Some("Elevation request cancelled by user"),
        })
        .await
        .unwrap();
        log.append(AuditEntry {
            peer: None,
            request: &req,
            outcome: Outcome::Exited,
            exit_code: Some(0),
            message: None,
        })
        .await
        .unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], "req-1");
        assert_eq!(first["outcome"], "denied");
        assert_eq!(first["peer"]["uid"], 2);
        assert_eq!(first["options"]["cwd"], "/tmp");
        assert_eq!(first["options"]["env"]["AZURE_TOKEN"], "[redacted]");
        assert!(!lines[0].contains("secret"));

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["outcome"], "exited");
        assert!(second["peer"].is_null());
    }
}
