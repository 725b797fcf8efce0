use crate::command::ToolCommand;
use crate::executor::CommandExecutor;
use crate::ToolchainError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
enum Canned {
    Output(String),
    Failure(String),
    Timeout,
}

/// Executor returning canned responses keyed by the full command line
/// (`"nix --version"`). Commands with no registered response behave as if
/// the program were not installed.
///
/// Responses queue up per command; the last one repeats once the queue is
/// down to a single entry.
#[derive(Debug, Default)]
pub struct MockExecutor {
    responses: Mutex<HashMap<String, VecDeque<Canned>>>,
    calls: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, command: &str, canned: Canned) -> Self {
        lock(&self.responses)
            .entry(command.to_owned())
            .or_default()
            .push_back(canned);
        self
    }

    #[must_use]
    pub fn respond(self, command: &str, stdout: &str) -> Self {
        self.push(command, Canned::Output(stdout.to_owned()))
    }

    #[must_use]
    pub fn fail(self, command: &str, stderr: &str) -> Self {
        self.push(command, Canned::Failure(stderr.to_owned()))
    }

    #[must_use]
    pub fn time_out(self, command: &str) -> Self {
        self.push(command, Canned::Timeout)
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// A typical healthy installation with flakes and one channel.
    pub fn healthy() -> Self {
        Self::new()
            .respond("nix --version", "nix (Nix) 2.18.1\n")
            .respond("nix flake --version", "nix (Nix) 2.18.1\n")
            .respond(
                "nix-channel --list",
                "nixpkgs https://nixos.org/channels/nixos-unstable\n",
            )
    }
}

impl CommandExecutor for MockExecutor {
    fn run(&self, command: &ToolCommand) -> Result<String, ToolchainError> {
        let line = command.to_string();
        lock(&self.calls).push(line.clone());

        let canned = {
            let mut responses = lock(&self.responses);
            match responses.get_mut(&line) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match canned {
            Some(Canned::Output(out)) => Ok(out),
            Some(Canned::Failure(stderr)) => Err(ToolchainError::Failed {
                command: line,
                status: "exit status: 1".to_owned(),
                stderr,
            }),
            Some(Canned::Timeout) => Err(ToolchainError::Timeout {
                command: line,
                after: command.timeout,
            }),
            None => Err(ToolchainError::NotInstalled(command.program.clone())),
        }
    }
}
