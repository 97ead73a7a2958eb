// ABOUTME: owns the host-wide state and admits command requests one at a time.
// ABOUTME: allowlist, enable flag, consent and elevation run in a single dispatcher before any spawn.

use std::sync::Arc;

use runcmd_common::{validate_request, CommandRequest, OutboundEvent};
use tokio::sync::mpsc;

use crate::allowlist::Allowlist;
use crate::audit::{AuditEntry, AuditLog, Outcome, PeerCredentials};
use crate::consent::{ConsentGate, Verdict};
use crate::elevation::{ElevationStrategy, Invocation};
use crate::runner::{self, EventSink, RunOutcome};

pub const RUN_CMD_DISABLED: &str = "Running commands is disabled";

pub struct Submission {
    pub request: CommandRequest,
    pub peer: Option<PeerCredentials>,
    pub events: EventSink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Not a request the boundary accepts. No events are sent.
    Dropped(String),
    /// Refused before spawning. The caller gets `message` on stderr and exit code 1.
    Refused { outcome: Outcome, message: String },
    Run(Invocation),
}

pub struct Gateway {
    allowlist: Allowlist,
    consent: ConsentGate,
    elevation: Arc<dyn ElevationStrategy>,
    audit: AuditLog,
    run_cmd_enabled: bool,
}

impl Gateway {
    pub fn new(
        allowlist: Allowlist,
        consent: ConsentGate,
        elevation: Arc<dyn ElevationStrategy>,
        audit: AuditLog,
        run_cmd_enabled: bool,
    ) -> Self {
        Self {
            allowlist,
            consent,
            elevation,
            audit,
            run_cmd_enabled,
        }
    }

    pub async fn admit(&self, request: &CommandRequest) -> Admission {
        if let Err(err) = validate_request(request) {
            return Admission::Dropped(err.message);
        }

        if !self.allowlist.permits(&request.command) {
            return Admission::Dropped(format!(
                "{:?} is not one of the permitted commands {:?}",
                request.command,
                self.allowlist.programs()
            ));
        }

        if !self.run_cmd_enabled {
            return Admission::Refused {
                outcome: Outcome::Disabled,
                message: RUN_CMD_DISABLED.to_string(),
            };
        }

        let id = request.id.as_str();
        let verdict = self
            .consent
            .check_command(id, &request.command, &request.args)
            .await;
        if let Some(refusal) = refusal(verdict) {
            return refusal;
        }

        if !request.elevated {
            return Admission::Run(Invocation {
                program: request.command.clone(),
                args: request.args.clone(),
            });
        }

        let verdict = self
            .consent
            .check_elevation(id, &request.command, &request.args)
            .await;
        if let Some(refusal) = refusal(verdict) {
            return refusal;
        }

        let invocation = self.elevation.elevate(&request.command, &request.args).await;
        log::info!(
            "[{id}] elevating {} via {} ({})",
            request.command,
            self.elevation.name(),
            invocation.program
        );
        Admission::Run(invocation)
    }

    /// Admits one request and, if it may run, starts its process in the background.
    /// Returns once admission is decided, not when the process ends.
    pub async fn handle(self: &Arc<Self>, submission: Submission) {
        let Submission {
            request,
            peer,
            events,
        } = submission;

        match self.admit(&request).await {
            Admission::Dropped(reason) => {
                log::warn!("[{}] dropped request: {reason}", request.id);
                self.record(peer, &request, Outcome::Dropped, None, Some(reason.as_str()))
                    .await;
            }
            Admission::Refused { outcome, message } => {
                let _ = events.send(OutboundEvent::stderr(&request.id, message.clone()));
                let _ = events.send(OutboundEvent::exit(&request.id, Some(1)));
                self.record(peer, &request, outcome, Some(1), Some(message.as_str()))
                    .await;
            }
            Admission::Run(invocation) => {
                let gateway = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = runner::run(
                        &request.id,
                        &invocation.program,
                        &invocation.args,
                        &request.options,
                        &events,
                    )
                    .await;
                    let (kind, message) = match &outcome {
                        RunOutcome::SpawnFailed(m) => (Outcome::SpawnFailed, Some(m.as_str())),
                        RunOutcome::Exited(_) => (Outcome::Exited, None),
                    };
                    gateway
                        .record(peer, &request, kind, outcome.exit_code(), message)
                        .await;
                });
            }
        }
    }

    /// Starts the single admission task. While it awaits a dialog no other request, from
    /// any connection, is admitted; processes already running keep streaming.
    pub fn spawn_dispatcher(self: Arc<Self>) -> mpsc::UnboundedSender<Submission> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Submission>();
        tokio::spawn(async move {
            while let Some(submission) = rx.recv().await {
                self.handle(submission).await;
            }
        });
        tx
    }

    async fn record(
        &self,
        peer: Option<PeerCredentials>,
        request: &CommandRequest,
        outcome: Outcome,
        exit_code: Option<i32>,
        message: Option<&str>,
    ) {
        let entry = AuditEntry {
            peer,
            request,
            outcome,
            exit_code,
            message,
        };
        if let Err(err) = self.audit.append(entry).await {
            log::error!("[{}] audit append failed: {err:#}", request.id);
        }
    }
}

fn refusal(verdict: Verdict) -> Option<Admission> {
    match verdict {
        Verdict::Allowed => None,
        Verdict::Denied(message) => Some(Admission::Refused {
            outcome: Outcome::Denied,
            message,
        }),
        Verdict::Unavailable(message) => Some(Admission::Refused {
            outcome: Outcome::PromptUnavailable,
            message,
        }),
    }
}
