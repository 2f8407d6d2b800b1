use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::{CommandConfig, ExecutionOutput, ServiceError};

/// Utility for spawning service processes
pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Spawn a process, feed `input` to its stdin and capture its output.
    ///
    /// When `config.timeout` elapses before the output streams close, the
    /// child is killed and `ServiceError::Timeout` is returned. The child is
    /// also killed if the returned future is dropped.
    pub async fn spawn(
        program: &Path,
        args: &[String],
        input: Option<&str>,
        config: &CommandConfig,
    ) -> Result<ExecutionOutput, ServiceError> {
        let start = Instant::now();

        debug!(
            program = %program.display(),
            args = ?args,
            working_dir = %config.working_dir.display(),
            input_len = input.map(str::len).unwrap_or(0),
            "Spawning service process"
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&config.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        if let (Some(payload), Some(mut stdin)) = (input, child.stdin.take()) {
            let payload = payload.to_string();
            // Written from a separate task so a child that fills its stdout
            // before draining stdin cannot deadlock us.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "Process closed stdin early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_handle = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::ExecutionFailed("stdout not captured".into()))?;
        let stderr_handle = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::ExecutionFailed("stderr not captured".into()))?;

        let collect = async {
            tokio::try_join!(
                read_stream(stdout_handle, "stdout"),
                read_stream(stderr_handle, "stderr")
            )
        };

        let (stdout, stderr) = match config.timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(streams) => streams?,
                Err(_) => {
                    debug!(timeout = ?limit, "Service process timed out, killing");
                    let _ = child.kill().await;
                    return Err(ServiceError::Timeout(limit));
                }
            },
            None => collect.await?,
        };

        let status = child.wait().await?;
        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);

        debug!(
            exit_code,
            duration_ms = duration.as_millis(),
            "Service process completed"
        );

        Ok(ExecutionOutput::new(stdout, stderr, exit_code, duration))
    }
}

async fn read_stream<R>(stream: R, label: &'static str) -> Result<String, ServiceError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream).lines();
    let mut collected = String::new();

    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| ServiceError::ExecutionFailed(format!("Failed to read {}: {}", label, e)))?
    {
        trace!(stream = label, line = %line);
        if !collected.is_empty() {
            collected.push('\n');
        }
        collected.push_str(&line);
    }

    Ok(collected)
}
