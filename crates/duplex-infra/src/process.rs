//! Command spawning for the CLI-backed adapters.
//!
//! Children are killed when their future is dropped, so a caller-side
//! timeout or cancellation never leaves a stray process behind.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use duplex_core::{ActionOutput, InfraError, InfraResult};

/// A command line plus its working directory, environment and stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Text written to the child's stdin, which is then closed.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn spawn(&self) -> InfraResult<tokio::process::Child> {
        debug!(command = %self, cwd = ?self.cwd, "spawning");
        self.command().spawn().map_err(|source| InfraError::Spawn {
            command: self.to_string(),
            source,
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

async fn feed_stdin(spec: &CommandSpec, child: &mut tokio::process::Child) -> InfraResult<()> {
    let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) else {
        return Ok(());
    };
    stdin
        .write_all(input.as_bytes())
        .await
        .map_err(|source| InfraError::Spawn {
            command: spec.to_string(),
            source,
        })?;
    // Dropping closes the pipe.
    drop(stdin);
    Ok(())
}

/// Run to completion and capture output. Exit status is reported, not
/// judged; see [`check`].
pub async fn run(spec: &CommandSpec, timeout: Option<Duration>) -> InfraResult<ActionOutput> {
    let mut child = spec.spawn()?;
    feed_stdin(spec, &mut child).await?;

    let wait = child.wait_with_output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| InfraError::Timeout {
                command: spec.to_string(),
                timeout: limit,
            })?,
        None => wait.await,
    }
    .map_err(|source| InfraError::Spawn {
        command: spec.to_string(),
        source,
    })?;

    Ok(ActionOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run to completion, handing every stdout and stderr line to `on_line`
/// as it arrives. Lines are also collected into the returned output.
pub async fn run_streaming(
    spec: &CommandSpec,
    on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
) -> InfraResult<ActionOutput> {
    let mut child = spec.spawn()?;
    feed_stdin(spec, &mut child).await?;

    let io_err = |source| InfraError::Spawn {
        command: spec.to_string(),
        source,
    };

    let mut stdout_lines = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr_lines = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut stdout = String::new();
    let mut stderr = String::new();

    while stdout_lines.is_some() || stderr_lines.is_some() {
        tokio::select! {
            line = next_line(&mut stdout_lines) => match line.map_err(io_err)? {
                Some(line) => {
                    on_line(&line);
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                None => stdout_lines = None,
            },
            line = next_line(&mut stderr_lines) => match line.map_err(io_err)? {
                Some(line) => {
                    on_line(&line);
                    stderr.push_str(&line);
                    stderr.push('\n');
                }
                None => stderr_lines = None,
            },
        }
    }

    let status = child.wait().await.map_err(io_err)?;
    Ok(ActionOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Turn a non-zero exit into [`InfraError::CommandFailed`].
pub fn check(spec: &CommandSpec, output: ActionOutput) -> InfraResult<ActionOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(InfraError::CommandFailed {
            command: spec.to_string(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("make")
            .arg("deploy:new-green")
            .args(["ACTIVE_DESIRED_CAPACITY=2", "ACTIVE_MIN_SIZE=1"]);
        assert_eq!(
            spec.to_string(),
            "make deploy:new-green ACTIVE_DESIRED_CAPACITY=2 ACTIVE_MIN_SIZE=1"
        );
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]);
        let output = run(&spec, None).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(matches!(
            check(&spec, output),
            Err(InfraError::CommandFailed { code: Some(3), .. })
        ));
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let spec = CommandSpec::new("sh").args(["-c", "read answer; echo got $answer"]).stdin("y\n");
        let output = run(&spec, None).await.unwrap();
        assert_eq!(output.stdout.trim(), "got y");
    }

    #[tokio::test]
    async fn times_out_slow_commands() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = run(&spec, Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, InfraError::Timeout { .. }));
        assert!(err.is_lock_contention());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let spec = CommandSpec::new("duplex-no-such-binary");
        assert!(matches!(run(&spec, None).await, Err(InfraError::Spawn { .. })));
    }

    #[tokio::test]
    async fn streams_lines_in_order() {
        let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two; echo three"]);
        let seen = Mutex::new(Vec::new());
        let output = run_streaming(&spec, &|line: &str| seen.lock().unwrap().push(line.to_string()))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(*seen.lock().unwrap(), ["one", "two", "three"]);
        assert_eq!(output.stdout, "one\ntwo\nthree\n");
    }
}
