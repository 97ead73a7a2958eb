// ABOUTME: resolves whether an allowlisted command may run, prompting once per program.
// ABOUTME: base consent is persisted per program name; elevation consent is asked on every call.

use std::sync::Arc;

use runcmd_common::settings::ConsentStore;

use crate::prompt::ConsentPrompt;

pub const ELEVATION_CANCELLED: &str = "Elevation request cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    Unknown,
    Allowed,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// The user said no, now or earlier. Carries the text shown on stderr.
    Denied(String),
    /// No dialog could be shown; nothing was persisted.
    Unavailable(String),
}

pub struct ConsentGate {
    store: ConsentStore,
    prompt: Arc<dyn ConsentPrompt>,
}

impl ConsentGate {
    pub fn new(store: ConsentStore, prompt: Arc<dyn ConsentPrompt>) -> Self {
        Self { store, prompt }
    }

    pub fn state(&self, command: &str) -> ConsentState {
        match self.store.decision(command) {
            None => ConsentState::Unknown,
            Some(true) => ConsentState::Allowed,
            Some(false) => ConsentState::Denied,
        }
    }

    pub async fn check_command(&self, id: &str, command: &str, args: &[String]) -> Verdict {
        match self.state(command) {
            ConsentState::Allowed => Verdict::Allowed,
            ConsentState::Denied => {
                log::warn!("[{id}] {command} not allowed by the user's prior choice");
                Verdict::Denied(format!(
                    "Command {command} is not allowed by the user's prior choice"
                ))
            }
            ConsentState::Unknown => {
                log::info!("[{id}] asking for consent to run {command}");
                let allowed = match self.prompt.confirm_command(command, args).await {
                    Ok(answer) => answer,
                    Err(err) => {
                        log::error!("[{id}] consent dialog failed: {err}");
                        return Verdict::Unavailable(format!(
                            "Cannot ask for consent to run {command}: {err}"
                        ));
                    }
                };

                if let Err(err) = self.store.record(command, allowed) {
                    log::error!(
                        "[{id}] could not save consent for {command} to {}: {err}",
                        self.store.path().display()
                    );
                }

                if allowed {
                    log::info!("[{id}] user allowed {command}");
                    Verdict::Allowed
                } else {
                    log::info!("[{id}] user denied {command}");
                    Verdict::Denied(format!("Command {command} was denied by the user"))
                }
            }
        }
    }

    pub async fn check_elevation(&self, id: &str, command: &str, args: &[String]) -> Verdict {
        log::info!("[{id}] asking for elevation consent for {command}");
        match self.prompt.confirm_elevation(command, args).await {
            Ok(true) => Verdict::Allowed,
            Ok(false) => {
                log::info!("[{id}] elevation of {command} cancelled");
                Verdict::Denied(ELEVATION_CANCELLED.to_string())
            }
            Err(err) => {
                log::error!("[{id}] elevation dialog failed: {err}");
                Verdict::Unavailable(format!(
                    "Cannot ask for elevation consent for {command}: {err}"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPrompt;

    fn gate(dir: &tempfile::TempDir, prompt: Arc<ScriptedPrompt>) -> ConsentGate {
        ConsentGate::new(ConsentStore::new(dir.path().join("settings.json")), prompt)
    }

    #[tokio::test]
    async fn first_use_prompts_and_persists_allow() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new().answer_command(true));
        let gate = gate(&dir, prompt.clone());

        assert_eq!(gate.state("minikube"), ConsentState::Unknown);
        assert_eq!(gate.check_command("r1", "minikube", &[]).await, Verdict::Allowed);
        assert_eq!(gate.state("minikube"), ConsentState::Allowed);

        assert_eq!(gate.check_command("r2", "minikube", &[]).await, Verdict::Allowed);
        assert_eq!(prompt.command_calls(), 1);
    }

    #[tokio::test]
    async fn denial_persists_and_is_never_asked_again() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new().answer_command(false));
        let gate = gate(&dir, prompt.clone());

        assert!(matches!(
            gate.check_command("r1", "minikube", &[]).await,
            Verdict::Denied(_)
        ));
        let second = gate.check_command("r2", "minikube", &[]).await;
        assert_eq!(
            second,
            Verdict::Denied("Command minikube is not allowed by the user's prior choice".to_string())
        );
        assert_eq!(prompt.command_calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_dialog_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = Arc::new(ScriptedPrompt::new().unavailable_command("no display"));
        let gate = gate(&dir, prompt);

        let verdict = gate.check_command("r1", "az", &[]).await;
        assert!(matches!(verdict, Verdict::Unavailable(ref m) if m.contains("no display")));
        assert_eq!(gate.state("az"), ConsentState::Unknown);
    }

    #[tokio::test]
    async fn elevation_is_asked_every_time_and_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = Arc::new(
            ScriptedPrompt::new()
                .answer_elevation(true)
                .answer_elevation(false),
        );
        let gate = gate(&dir, prompt.clone());
        ConsentStore::new(dir.path().join("settings.json"))
            .record("az", true)
            .unwrap();

        assert_eq!(gate.check_elevation("r1", "az", &[]).await, Verdict::Allowed);
        assert_eq!(
            gate.check_elevation("r2", "az", &[]).await,
            Verdict::Denied(ELEVATION_CANCELLED.to_string())
        );
        assert_eq!(prompt.elevation_calls(), 2);
        assert_eq!(gate.state("az"), ConsentState::Allowed);
    }
}
