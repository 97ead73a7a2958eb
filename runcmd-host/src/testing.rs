// ABOUTME: scripted stand-ins for the dialog and elevation seams used by unit tests.
// ABOUTME: records how often each prompt was shown so tests can assert on it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::elevation::{ElevationStrategy, Invocation};
use crate::prompt::{ConsentPrompt, PromptError};

#[derive(Default)]
pub struct ScriptedPrompt {
    command_answers: Mutex<VecDeque<Result<bool, String>>>,
    elevation_answers: Mutex<VecDeque<Result<bool, String>>>,
    command_calls: AtomicUsize,
    elevation_calls: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_command(self, allow: bool) -> Self {
        self.command_answers.lock().unwrap().push_back(Ok(allow));
        self
    }

    pub fn unavailable_command(self, reason: &str) -> Self {
        self.command_answers
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
        self
    }

    pub fn answer_elevation(self, allow: bool) -> Self {
        self.elevation_answers.lock().unwrap().push_back(Ok(allow));
        self
    }

    pub fn command_calls(&self) -> usize {
        self.command_calls.load(Ordering::SeqCst)
    }

    pub fn elevation_calls(&self) -> usize {
        self.elevation_calls.load(Ordering::SeqCst)
    }
}

fn next(queue: &Mutex<VecDeque<Result<bool, String>>>) -> Result<bool, PromptError> {
    match queue.lock().unwrap().pop_front() {
        Some(Ok(answer)) => Ok(answer),
        Some(Err(reason)) => Err(PromptError::Unavailable(reason)),
        None => panic!("prompt shown more often than scripted"),
    }
}

#[async_trait]
impl ConsentPrompt for ScriptedPrompt {
    async fn confirm_command(&self, _command: &str, _args: &[String]) -> Result<bool, PromptError> {
        self.command_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.command_answers)
    }

    async fn confirm_elevation(&self, _command: &str, _args: &[String]) -> Result<bool, PromptError> {
        self.elevation_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.elevation_answers)
    }
}

/// Runs the command unprivileged through `env`, so elevated requests are observable.
pub struct EnvElevation;

#[async_trait]
impl ElevationStrategy for EnvElevation {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn elevate(&self, command: &str, args: &[String]) -> Invocation {
        let mut argv = vec![command.to_string()];
        argv.extend(args.iter().cloned());
        Invocation {
            program: "env".to_string(),
            args: argv,
        }
    }
}
