// External tool discovery and health probing

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use super::utils::run_output_with_timeout;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

/// Result of probing a tool binary
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub path: String,
    pub available: bool,
    pub version: Option<String>,
}

pub struct ToolManager {
    extra_dirs: Vec<PathBuf>,
}

impl ToolManager {
    pub fn new() -> Self {
        let mut extra_dirs = vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/usr/bin"),
        ];
        if let Some(home) = dirs::home_dir() {
            extra_dirs.push(home.join(".local/bin"));
        }
        Self { extra_dirs }
    }

    /// Resolve a tool to a path: PATH first, then common install dirs.
    /// Falls back to the bare name so a later spawn reports it missing.
    pub fn locate(&self, tool: ToolType) -> PathBuf {
        let binary = binary_name(tool);
        let path_dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
            .unwrap_or_default();

        path_dirs
            .iter()
            .chain(self.extra_dirs.iter())
            .map(|dir| dir.join(&binary))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(binary))
    }

    /// Run the tool's version command to check it is invocable
    pub async fn probe(&self, tool: ToolType, path: &Path) -> ToolInfo {
        let output = run_output_with_timeout(
            path,
            &[tool.version_arg().to_string()],
            Duration::from_secs(10),
        )
        .await;

        let version = match output {
            Ok(out) if out.status.success() => Some(
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            ),
            _ => None,
        };

        ToolInfo {
            name: tool.as_str(),
            path: path.display().to_string(),
            available: version.is_some(),
            version,
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

fn binary_name(tool: ToolType) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool.as_str())
    } else {
        tool.as_str().to_string()
    }
}
