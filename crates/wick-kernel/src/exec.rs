//! Command execution.
//!
//! Expanded templates run either directly (split with shell-word rules) or
//! through `sh -c` when they contain shell operators. An optional second
//! command reads the first one's stdout.
//!
//! Identical command lines run at most once per process; see `CommandCache`.

use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Regex, RegexSet};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::state::CommandCache;

/// Characters that force shell invocation. Covers `&&`, `||` and `$(...)`.
const SHELL_OPERATORS: &[char] = &[';', '|', '&', '<', '>', '$', '`'];

/// stderr noise not worth reporting.
static BENIGN_STDERR: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // curl progress meter
        r"^\s*%\s+Total\s+%\s+Received",
        r"^\s*Dload\s+Upload",
        // %, Total, %, Received, %, Xferd, Dload, Upload, three times, Speed
        r"^\s*\d{1,3}\s+[\d.]+[kMG]?\s+\d{1,3}\s+[\d.]+[kMG]?\s+\d{1,3}\s+[\d.]+[kMG]?\s+[\d.]+[kMG]?\s+[\d.]+[kMG]?\s+(?:[\d-]+:[\d-]{2}:[\d-]{2}\s+){3}[\d.]+[kMG]?\s*$",
        // a blank line fed to a shell
        r"syntax error near unexpected token `(newline|\))'",
        r"^\s*$",
    ])
    .expect("valid stderr patterns")
});

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid ansi regex")
});

/// Command execution failures.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot parse command {command:?}: {message}")]
    Tokenize { command: String, message: String },
    #[error("empty command")]
    Empty,
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("exit code {code}: {stderr}")]
    Exit { code: i32, stderr: String },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_))
    }
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Non-empty stdout lines, cleaned if requested.
    pub lines: Vec<String>,
    /// stderr lines that are not known noise.
    pub stderr: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Ran(CommandOutput),
    /// The same command already ran in this process.
    Skipped,
}

/// Whether `command` needs a shell to run.
pub fn needs_shell(command: &str) -> bool {
    command.contains(SHELL_OPERATORS)
}

/// Strip ANSI escapes and non-printable characters.
pub fn clean_line(line: &str) -> String {
    ANSI_ESCAPE
        .replace_all(line, "")
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

/// Whether an stderr line is known harmless noise.
///
/// curl redraws its meter with `\r`, so every redraw must be benign.
pub fn is_benign_stderr(line: &str) -> bool {
    line.split('\r').all(|part| BENIGN_STDERR.is_match(part))
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Build a `Command` for `command`, choosing shell or argv invocation.
fn build_command(command: &str) -> Result<(String, Command), ExecError> {
    if needs_shell(command) {
        return Ok((command.to_string(), shell_command(command)));
    }
    let argv = shell_words::split(command).map_err(|e| ExecError::Tokenize {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    let (program, args) = argv.split_first().ok_or(ExecError::Empty)?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok((program.clone(), cmd))
}

fn spawn(program: &str, cmd: &mut Command) -> Result<Child, ExecError> {
    cmd.kill_on_drop(true).stderr(Stdio::piped());
    cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound(program.to_string())
        } else {
            ExecError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    })
}

/// Read `reader` to the end as lossy UTF-8 lines.
async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<Vec<String>> {
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(lines);
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }
}

/// Runs expanded templates as OS commands.
#[derive(Debug)]
pub struct CommandExecutor {
    cache: Arc<CommandCache>,
    timeout: Option<Duration>,
    clean: bool,
}

impl CommandExecutor {
    pub fn new(cache: Arc<CommandCache>, timeout: Option<Duration>, clean: bool) -> Self {
        Self {
            cache,
            timeout,
            clean,
        }
    }

    /// Run `command`, optionally piping its stdout into `pipe`.
    ///
    /// Returns `Skipped` if this exact command (and pipe) already ran. On
    /// timeout or cancellation every spawned process is killed and reaped.
    pub async fn execute(
        &self,
        command: &str,
        pipe: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, ExecError> {
        let key = match pipe {
            Some(p) => format!("{}\0{}", command, p),
            None => command.to_string(),
        };
        if !self.cache.first_seen(&key) {
            tracing::debug!("skipping already executed command: {}", command);
            return Ok(ExecOutcome::Skipped);
        }

        let (program, mut first) = build_command(command)?;
        first.stdin(Stdio::null()).stdout(Stdio::piped());
        let mut first = spawn(&program, &mut first)?;

        let mut second = match pipe {
            Some(pipe) => {
                let (pipe_program, mut cmd) = build_command(pipe)?;
                let stdout = first
                    .stdout
                    .take()
                    .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;
                let stdin: Stdio = stdout.try_into()?;
                cmd.stdin(stdin).stdout(Stdio::piped());
                let child = spawn(&pipe_program, &mut cmd)?;
                // Close our copy of the read end.
                drop(cmd);
                Some(child)
            }
            None => None,
        };

        let result = {
            let run = collect(&mut first, second.as_mut());
            let timeout = async {
                match self.timeout {
                    Some(t) => tokio::time::sleep(t).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExecError::Cancelled),
                _ = timeout => Err(ExecError::Timeout(self.timeout.unwrap_or_default())),
                r = run => r,
            }
        };

        if result.is_err() {
            for child in std::iter::once(&mut first).chain(second.as_mut()) {
                let _ = child.kill().await;
            }
        }

        let mut output = result?;
        if self.clean {
            for line in &mut output.lines {
                *line = clean_line(line);
            }
        }
        output.lines.retain(|l| !l.trim().is_empty());
        Ok(ExecOutcome::Ran(output))
    }
}

/// Wait for both children, reading stdout from the last one in the pipe and
/// stderr from both.
async fn collect(first: &mut Child, second: Option<&mut Child>) -> Result<CommandOutput, ExecError> {
    let (mut head, tail) = match second {
        Some(second) => (Some(first), second),
        None => (None, first),
    };

    let stdout = tail.stdout.take();
    let tail_err = tail.stderr.take();
    let head_err = head.as_mut().and_then(|h| h.stderr.take());

    let stdout_task = async {
        match stdout {
            Some(s) => read_lines(s).await,
            None => Ok(Vec::new()),
        }
    };
    let tail_err_task = async {
        match tail_err {
            Some(s) => read_lines(s).await,
            None => Ok(Vec::new()),
        }
    };
    let head_err_task = async {
        match head_err {
            Some(s) => read_lines(s).await,
            None => Ok(Vec::new()),
        }
    };

    let (lines, tail_stderr, head_stderr) = tokio::try_join!(stdout_task, tail_err_task, head_err_task)?;
    // The head's exit code is not reported, matching `sh` pipelines.
    if let Some(head) = head {
        head.wait().await?;
    }
    let status = tail.wait().await?;

    let stderr: Vec<String> = head_stderr
        .into_iter()
        .chain(tail_stderr)
        .filter(|l| !is_benign_stderr(l))
        .collect();

    if !status.success() {
        return Err(ExecError::Exit {
            code: status.code().unwrap_or(-1),
            stderr: stderr.join("; "),
        });
    }
    Ok(CommandOutput { lines, stderr })
}
