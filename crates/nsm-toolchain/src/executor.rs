use crate::command::ToolCommand;
use crate::ToolchainError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs a [`ToolCommand`] and returns its stdout on success.
pub trait CommandExecutor: Send + Sync {
    fn run(&self, command: &ToolCommand) -> Result<String, ToolchainError>;
}

/// Spawns real processes. The child is killed when its timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    })
}

impl CommandExecutor for SystemExecutor {
    fn run(&self, command: &ToolCommand) -> Result<String, ToolchainError> {
        let cmdline = command.to_string();
        debug!("running {cmdline} (timeout {:?})", command.timeout);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolchainError::NotInstalled(command.program.clone())
            } else {
                ToolchainError::Spawn {
                    command: cmdline.clone(),
                    source: e,
                }
            }
        })?;

        // Read both pipes concurrently so a chatty child cannot fill one
        // and block forever.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + command.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!("{cmdline} killed after {:?}", command.timeout);
                    return Err(ToolchainError::Timeout {
                        command: cmdline,
                        after: command.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(ToolchainError::Spawn {
                        command: cmdline,
                        source: e,
                    });
                }
            }
        };

        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();
        trace!("{cmdline}: {status}, {} bytes stdout", out.len());

        if !status.success() {
            return Err(ToolchainError::Failed {
                command: cmdline,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&err).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
