use super::{Evaluation, ExecutionStrategy, StrategyError, StrategyKind};
use crate::{config::WorkerConfig, rule::evaluate, worker::WorkerReply};
use async_trait::async_trait;
use std::{
    io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    time::{sleep, timeout},
};
use tracing::instrument;

/// Runs detection in a fresh worker process per request and reads one reply
/// line from its stdout.
pub struct IsolatedStrategy {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    spawn_retry_delay: Duration,
}

impl IsolatedStrategy {
    pub fn new(worker_config: &WorkerConfig) -> io::Result<Self> {
        Ok(Self {
            program: worker_config.get_program()?,
            args: worker_config.args.clone(),
            timeout: worker_config.get_timeout(),
            spawn_retry_delay: worker_config.get_spawn_retry_delay(),
        })
    }

    fn spawn(&self, image_path: &Path) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// A failed launch is retried once after a short jittered pause.
    async fn spawn_with_retry(&self, image_path: &Path) -> Result<Child, StrategyError> {
        match self.spawn(image_path) {
            Ok(child) => Ok(child),
            Err(e) => {
                tracing::warn!(program = ?self.program, "Failed to spawn worker, retrying: {}", e);
                let jitter = rand::random::<f32>() * 0.2 + 0.9;
                sleep(self.spawn_retry_delay.mul_f32(jitter)).await;

                self.spawn(image_path).map_err(|e| {
                    StrategyError::WorkerFailure(format!("failed to spawn worker: {}", e))
                })
            }
        }
    }

    async fn wait_for_reply(&self, child: Child) -> Result<WorkerReply, StrategyError> {
        // Dropping the pending future on timeout drops the child, which kills it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(StrategyError::WorkerFailure(format!(
                    "failed to collect worker output: {}",
                    e
                )))
            }
            Err(_) => {
                tracing::error!("Worker exceeded {:?}, killed", self.timeout);
                return Err(StrategyError::WorkerTimeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(StrategyError::WorkerFailure(format!(
                "worker exited ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        match parse_reply(&output) {
            Some(reply) => Ok(reply),
            None => Err(StrategyError::WorkerFailure(format!(
                "worker exited ({}) without a result: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// The reply is the last non-empty stdout line.
fn parse_reply(output: &Output) -> Option<WorkerReply> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;

    match serde_json::from_str(line) {
        Ok(reply) => Some(reply),
        Err(e) => {
            tracing::warn!("Unreadable worker reply {:?}: {}", line, e);
            None
        }
    }
}

#[async_trait]
impl ExecutionStrategy for IsolatedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Isolated
    }

    #[instrument(skip(self))]
    async fn execute(&self, image_path: &Path) -> Result<Evaluation, StrategyError> {
        let child = self.spawn_with_retry(image_path).await?;
        tracing::debug!(pid = ?child.id(), "Worker spawned");

        match self.wait_for_reply(child).await? {
            WorkerReply::Frame(points) => {
                let verdict = evaluate(&points.players, points.ball);
                Ok(Evaluation { points, verdict })
            }
            WorkerReply::DetectionFailed(message) => Err(StrategyError::DetectionFailure(message)),
        }
    }
}
