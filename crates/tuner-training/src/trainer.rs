use crate::error::{TrainingError, TrainingResult};
use crate::progress::{ProgressEvent, ProgressSender, ProgressStream};
use crate::secrets::JobSecrets;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// External training routine.
///
/// Implementations consume the serialized configuration at `config_path` and
/// report progress through the returned stream until training ends.
#[async_trait]
pub trait TrainingDelegate: Send + Sync {
    fn id(&self) -> &'static str;

    async fn start(&self, config_path: &Path, secrets: &JobSecrets) -> TrainingResult<ProgressStream>;
}

/// Runs training as a child process: `<program> <args...> <config_path>`.
///
/// Each non-empty stdout line becomes one progress event. A non-zero exit
/// status ends the stream with an error.
#[derive(Debug, Clone)]
pub struct SubprocessTrainer {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl SubprocessTrainer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, working_dir: None }
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl TrainingDelegate for SubprocessTrainer {
    fn id(&self) -> &'static str {
        "subprocess"
    }

    async fn start(&self, config_path: &Path, secrets: &JobSecrets) -> TrainingResult<ProgressStream> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        secrets.apply_to(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            TrainingError::Trainer(format!("failed to spawn {}: {e}", self.program.display()))
        })?;
        debug!(pid = ?child.id(), program = %self.program.display(), "trainer process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("trainer stdout was not captured".to_string()))?;

        let (sender, stream) = ProgressStream::channel(64);
        tokio::spawn(drive_child(child, stdout, sender));
        Ok(stream)
    }
}

async fn drive_child(mut child: Child, stdout: ChildStdout, sender: ProgressSender) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            () = sender.cancelled() => {
                warn!("cancelling trainer process");
                let _ = child.kill().await;
                sender.fail(TrainingError::Cancelled).await;
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if !sender.event(ProgressEvent::from_line(&line)).await {
                        // Consumer went away.
                        let _ = child.kill().await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = child.kill().await;
                    sender.fail(e.into()).await;
                    return;
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => debug!("trainer process exited cleanly"),
        Ok(status) => {
            sender.fail(TrainingError::Trainer(format!("trainer exited with {status}"))).await;
        }
        Err(e) => {
            sender.fail(e.into()).await;
        }
    }
}
