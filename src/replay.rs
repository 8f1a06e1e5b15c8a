//! Invoking the external replay runtime.
//!
//! The replay runtime executes the application under a prescribed
//! schedule and drops its outputs at a fixed set of temp paths. The
//! invoker formats the configured command template, runs it, and moves
//! the outputs into a per-run directory; a failed run leaves its
//! diagnostics under an underscore-prefixed directory so a later
//! fast-forwarded session knows not to retry it.
//!
//! The invoker owns the temp paths exclusively between launching the
//! command and moving the files; callers must not interleave
//! invocations.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// One replay to perform.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    /// Run name; becomes the per-run directory name.
    pub name: &'a str,
    /// Name of the run this schedule was derived from; recorded in the
    /// `origin` artifact.
    pub origin: &'a str,
    /// Directory holding the recorded logs the runtime replays from.
    pub base_dir: &'a Path,
    /// The prepared schedule file to execute.
    pub schedule: &'a Path,
}

/// Where a completed run's outputs ended up.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    /// The per-run output directory.
    pub dir: PathBuf,
    /// The schedule the runtime actually executed.
    pub schedule: PathBuf,
    /// The recorded action log, input to race detection.
    pub action_log: PathBuf,
}

/// Seam between the exploration engines and the replay runtime.
pub trait Replayer {
    /// Executes one replay and returns where its outputs landed.
    fn execute(&mut self, request: &RunRequest<'_>) -> Result<RunArtifacts>;

    /// Asks the outcome query whether the named run was benign, i.e.
    /// indistinguishable from the run it was derived from.
    fn query_outcome(&mut self, run_name: &str) -> bool {
        let _ = run_name;
        false
    }
}

/// The fixed temp paths the replay runtime writes to.
#[derive(Debug, Clone)]
pub struct ReplayPaths {
    /// Recorded action log.
    pub action_log: PathBuf,
    /// Executed schedule.
    pub schedule_log: PathBuf,
    /// Error log.
    pub error_log: PathBuf,
    /// Final screenshot.
    pub screenshot: PathBuf,
    /// Captured standard output of the replay command.
    pub stdout: PathBuf,
    /// Network replay log.
    pub network_log: PathBuf,
    /// Time replay log.
    pub time_log: PathBuf,
    /// Random-source replay log.
    pub random_log: PathBuf,
    /// Exit status log.
    pub status_log: PathBuf,
}

impl Default for ReplayPaths {
    fn default() -> Self {
        Self {
            action_log: PathBuf::from("/tmp/out.ER_actionlog"),
            schedule_log: PathBuf::from("/tmp/out.schedule.data"),
            error_log: PathBuf::from("/tmp/out.errors.log"),
            screenshot: PathBuf::from("/tmp/out.screenshot.png"),
            stdout: PathBuf::from("/tmp/stdout.txt"),
            network_log: PathBuf::from("/tmp/log.network.data"),
            time_log: PathBuf::from("/tmp/log.time.data"),
            random_log: PathBuf::from("/tmp/log.random.data"),
            status_log: PathBuf::from("/tmp/status.data"),
        }
    }
}

/// Production replayer: runs the configured command through `sh -c`.
#[derive(Debug, Clone)]
pub struct CommandReplayer {
    /// Replay command template with three `%s` placeholders, filled in
    /// order with the base directory, the site, and the schedule path.
    pub replay_command: String,
    /// Outcome-query template with two `%s` placeholders (output
    /// directory, run name); absent means every run counts as distinct.
    pub query_command: Option<String>,
    /// The site to replay.
    pub site: String,
    /// Root of the per-run output directories.
    pub out_dir: PathBuf,
    /// Temp paths shared with the runtime.
    pub paths: ReplayPaths,
    /// Reuse already-populated per-run directories instead of
    /// re-executing.
    pub fast_forward: bool,
}

fn fill_template(template: &str, args: &[&str]) -> String {
    let mut out = template.to_string();
    for arg in args {
        out = out.replacen("%s", arg, 1);
    }
    out
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        tracing::error!(from = %from.display(), to = %to.display(), "cannot move file");
        Error::io(from, e)
    })
}

impl CommandReplayer {
    fn run_dir(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    fn failed_dir(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("_{name}"))
    }

    fn artifacts(&self, dir: PathBuf) -> RunArtifacts {
        let schedule = dir.join("schedule.data");
        let action_log = dir.join("ER_actionlog");
        RunArtifacts {
            dir,
            schedule,
            action_log,
        }
    }

    /// Checks the fast-forward cache for `name`.
    ///
    /// `Some(Ok(_))` replays nothing; `Some(Err(_))` marks a run that
    /// already failed once; `None` means execute for real (an
    /// incompletely populated directory falls through to execution).
    fn fast_forwarded(&self, name: &str) -> Option<Result<RunArtifacts>> {
        if !self.fast_forward {
            return None;
        }
        let candidate = self.artifacts(self.run_dir(name));
        if candidate.schedule.is_file() && candidate.action_log.is_file() {
            tracing::info!(run = name, "fast-forwarding from cached run");
            return Some(Ok(candidate));
        }
        if self.failed_dir(name).is_dir() {
            tracing::info!(run = name, "skipping run that previously failed");
            return Some(Err(Error::PreviouslyFailed {
                name: name.to_string(),
            }));
        }
        None
    }

    fn record_failure(&self, request: &RunRequest<'_>) {
        let dir = self.failed_dir(request.name);
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::error!(dir = %dir.display(), error = %e, "cannot create failure dir");
            return;
        }
        let _ = move_file(request.schedule, &dir.join("schedule.data"));
        let _ = move_file(&self.paths.stdout, &dir.join("stdout"));
        let _ = fs::write(dir.join("origin"), format!("{}\n", request.origin));
    }
}

impl Replayer for CommandReplayer {
    fn execute(&mut self, request: &RunRequest<'_>) -> Result<RunArtifacts> {
        if let Some(cached) = self.fast_forwarded(request.name) {
            return cached;
        }

        let command = fill_template(
            &self.replay_command,
            &[
                &request.base_dir.display().to_string(),
                &self.site,
                &request.schedule.display().to_string(),
            ],
        );
        tracing::info!(run = request.name, %command, "running replay");

        let stdout = fs::File::create(&self.paths.stdout)
            .map_err(|e| Error::io(&self.paths.stdout, e))?;
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::from(stdout))
            .status()
            .map_err(|e| Error::io(request.schedule, e))?;
        if !status.success() {
            tracing::warn!(run = request.name, %status, "replay command failed");
            self.record_failure(request);
            return Err(Error::CommandFailed { command });
        }

        let dir = self.run_dir(request.name);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        if let Some(file_name) = request.schedule.file_name() {
            move_file(request.schedule, &dir.join(file_name))?;
        }
        move_file(&self.paths.action_log, &dir.join("ER_actionlog"))?;
        move_file(&self.paths.schedule_log, &dir.join("schedule.data"))?;
        move_file(&self.paths.screenshot, &dir.join("screenshot.png"))?;
        move_file(&self.paths.error_log, &dir.join("errors.log"))?;
        move_file(&self.paths.stdout, &dir.join("stdout"))?;
        move_file(&self.paths.network_log, &dir.join("log.network.data"))?;
        move_file(&self.paths.time_log, &dir.join("log.time.data"))?;
        move_file(&self.paths.random_log, &dir.join("log.random.data"))?;
        move_file(&self.paths.status_log, &dir.join("status.data"))?;
        fs::write(dir.join("origin"), format!("{}\n", request.origin))
            .map_err(|e| Error::io(&dir, e))?;

        Ok(self.artifacts(dir))
    }

    fn query_outcome(&mut self, run_name: &str) -> bool {
        let Some(template) = &self.query_command else {
            return false;
        };
        let command = fill_template(template, &[&self.out_dir.display().to_string(), run_name]);
        tracing::info!(run = run_name, %command, "running outcome query");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                stdout.lines().next() == Some("LOW")
            }
            Ok(output) => {
                tracing::warn!(run = run_name, status = %output.status, "outcome query failed");
                false
            }
            Err(e) => {
                tracing::warn!(run = run_name, error = %e, "cannot run outcome query");
                false
            }
        }
    }
}
