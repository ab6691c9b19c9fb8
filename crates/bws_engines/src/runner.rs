#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bws_contracts::calc::CalculationKind;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::EngineConfig;

pub const MAX_NICENESS: u8 = 19;
pub const PEOPLE_PER_NICENESS_STEP: usize = 15;

/// Larger families run at lower priority: `min(19, size / 15)`.
pub fn niceness(family_size: usize) -> u8 {
    let steps = family_size / PEOPLE_PER_NICENESS_STEP;
    u8::try_from(steps).unwrap_or(MAX_NICENESS).min(MAX_NICENESS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    TimedOut,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::TimedOut => "timed_out",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::TimedOut | RunState::Failed
        )
    }
}

/// One engine invocation. Positional arguments follow the engine's calling
/// convention: batch, locus, stdout name, output name, incidence table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineJob {
    pub family_id: String,
    pub kind: CalculationKind,
    pub executable: PathBuf,
    pub workspace: PathBuf,
    pub batch_file: PathBuf,
    pub locus_file: PathBuf,
    pub stdout_name: String,
    pub output_name: String,
    pub incidence_file: PathBuf,
    pub family_size: usize,
}

impl EngineJob {
    pub fn output_path(&self) -> PathBuf {
        self.workspace.join(&self.output_name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start engine {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("engine did not finish within {timeout:?}")]
    TimedOut { timeout: Duration },
    #[error("engine exited unsuccessfully (exit code {exit_code:?})")]
    Failed { exit_code: Option<i32> },
    #[error("failed waiting for engine: {0}")]
    Wait(#[source] std::io::Error),
    #[error("engine output {path} unreadable: {source}")]
    MissingOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: EngineConfig,
}

impl ProcessRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Niceness is applied by the launcher before it execs the engine, so the
    /// engine never runs at default priority. The engine leads its own
    /// process group so that helpers it leaves behind can be killed with it.
    pub fn command(&self, job: &EngineJob) -> Command {
        let nice = niceness(job.family_size);
        let mut std_cmd = match &self.config.nice_program {
            Some(launcher) => {
                let mut cmd = std::process::Command::new(launcher);
                cmd.arg("-n").arg(nice.to_string()).arg(&job.executable);
                cmd
            }
            None => std::process::Command::new(&job.executable),
        };
        std_cmd
            .arg(&job.batch_file)
            .arg(&job.locus_file)
            .arg(&job.stdout_name)
            .arg(&job.output_name)
            .arg(&job.incidence_file)
            .current_dir(&job.workspace)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_cmd, 0);

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Runs the engine to completion and returns the raw text of its output
    /// file. The content is not interpreted here.
    #[instrument(
        name = "engine_run",
        skip_all,
        fields(family_id = %job.family_id, kind = job.kind.as_str(), niceness = niceness(job.family_size))
    )]
    pub async fn run(&self, job: &EngineJob) -> Result<String, RunnerError> {
        let mut state = RunState::Pending;
        let deadline = Instant::now() + self.config.timeout;
        let mut child = self.command(job).spawn().map_err(|source| RunnerError::Spawn {
            program: job.executable.clone(),
            source,
        })?;
        let pid = child.id();
        state = transition(state, RunState::Running);

        // Drain stdout concurrently so a chatty engine cannot block on a full pipe.
        let stdout = child.stdout.take();
        let mut capture = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        // Exit and end of stdout share one deadline: a helper that keeps the
        // pipe open after the engine exits counts against it.
        let finished = tokio::time::timeout_at(deadline, async {
            let status = child.wait().await;
            let captured = (&mut capture).await.unwrap_or_default();
            (status, captured)
        })
        .await;
        let (status, captured) = match finished {
            Ok((status, captured)) => (status.map_err(RunnerError::Wait)?, captured),
            Err(_) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                capture.abort();
                transition(state, RunState::TimedOut);
                error!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "engine timed out; the pedigree is too large or complex to process"
                );
                return Err(RunnerError::TimedOut {
                    timeout: self.config.timeout,
                });
            }
        };

        if !status.success() {
            transition(state, RunState::Failed);
            error!(exit_code = ?status.code(), stdout = %captured, "engine failed");
            return Err(RunnerError::Failed {
                exit_code: status.code(),
            });
        }

        let path = job.output_path();
        let text = read_output(&path).await.inspect_err(|_| {
            transition(state, RunState::Failed);
        })?;
        transition(state, RunState::Succeeded);
        info!(output = %path.display(), "engine calculation complete");
        Ok(text)
    }
}

fn transition(from: RunState, to: RunState) -> RunState {
    debug!(from = from.as_str(), to = to.as_str(), "engine state");
    to
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(%errno, "engine process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_output(path: &Path) -> Result<String, RunnerError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RunnerError::MissingOutput {
            path: path.to_path_buf(),
            source,
        })
}
