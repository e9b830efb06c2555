// Helper functions shared by the external tool integrations

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to collect output: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a command to completion, capturing output, with a wall-clock bound.
///
/// The child is killed when the bound is hit or when the returned future is
/// dropped, so a cancelled request never leaves a stray process behind.
pub async fn run_output_with_timeout(
    program: &Path,
    args: &[String],
    limit: Duration,
) -> Result<std::process::Output, RunError> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    // Drain both pipes while waiting; a full pipe would otherwise stall the child
    let collect = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let read_out = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        tokio::try_join!(read_out, read_err)?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(std::process::Output {
            status,
            stdout,
            stderr,
        })
    };

    match timeout(limit, collect).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(RunError::Timeout(limit.as_secs())),
    }
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(proxy: Option<&str>) -> Vec<String> {
    match proxy {
        Some(p) if !p.trim().is_empty() => vec!["--proxy".to_string(), p.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Build cookie arguments for yt-dlp
pub fn get_cookie_args(cookies_path: Option<&str>) -> Vec<String> {
    match cookies_path {
        Some(path) => vec!["--cookies".to_string(), path.to_string()],
        None => Vec::new(),
    }
}

/// Build socket timeout arguments for yt-dlp
pub fn get_timeout_args(seconds: u32) -> Vec<String> {
    vec!["--socket-timeout".to_string(), seconds.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_args_skip_blank() {
        assert!(get_proxy_args(None).is_empty());
        assert!(get_proxy_args(Some("  ")).is_empty());
        assert_eq!(
            get_proxy_args(Some("socks5://127.0.0.1:1080")),
            vec!["--proxy", "socks5://127.0.0.1:1080"]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = run_output_with_timeout(
            Path::new("/nonexistent/definitely-not-a-tool"),
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_output_with_timeout(
            Path::new("sleep"),
            &["5".to_string()],
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::Timeout(_)));
    }
}
