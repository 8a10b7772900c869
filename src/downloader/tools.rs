// External binary discovery and startup availability report

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
    Ffprobe,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::Ffprobe => "ffprobe",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            // ffmpeg suite uses a single dash
            ToolType::Ffmpeg | ToolType::Ffprobe => "-version",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub tool_type: ToolType,
    pub path: PathBuf,
    pub version: Option<String>,
    pub is_available: bool,
}

/// Find a binary in the usual install prefixes, then on `PATH`.
pub fn locate(tool: ToolType) -> Option<PathBuf> {
    let name = tool.as_str();
    let mut common_paths = vec![
        PathBuf::from(format!("/usr/local/bin/{}", name)),
        PathBuf::from(format!("/usr/bin/{}", name)),
        PathBuf::from(format!("/opt/homebrew/bin/{}", name)),
    ];
    // pip --user installs
    if let Some(home) = dirs::home_dir() {
        common_paths.push(home.join(".local/bin").join(name));
    }

    if let Some(found) = common_paths.into_iter().find(|p| p.is_file()) {
        return Some(found);
    }

    match Command::new("which").arg(name).output() {
        Ok(output) if output.status.success() => {
            let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!found.is_empty()).then(|| PathBuf::from(found))
        }
        _ => None,
    }
}

/// Explicit override, else a discovered path, else the bare name (resolved via `PATH` at spawn).
pub fn resolve_binary(tool: ToolType, override_path: Option<PathBuf>) -> PathBuf {
    override_path
        .or_else(|| locate(tool))
        .unwrap_or_else(|| PathBuf::from(tool.as_str()))
}

pub fn probe_tool(tool: ToolType, path: &Path) -> ToolInfo {
    let version = match Command::new(path).arg(tool.version_arg()).output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()),
        _ => None,
    };

    ToolInfo {
        tool_type: tool,
        path: path.to_path_buf(),
        is_available: version.is_some(),
        version,
    }
}

/// Log which external tools are usable. Missing tools are warnings, not errors:
/// the affected stage reports the absence per request.
pub fn report_tools(tools: &[(ToolType, &Path)]) -> Vec<ToolInfo> {
    tools
        .iter()
        .map(|(tool, path)| {
            let info = probe_tool(*tool, path);
            if info.is_available {
                info!(
                    tool = tool.as_str(),
                    path = %info.path.display(),
                    version = info.version.as_deref().unwrap_or("?"),
                    "external tool available"
                );
            } else {
                warn!(tool = tool.as_str(), path = %info.path.display(), "external tool not available");
            }
            info
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins() {
        let path = resolve_binary(ToolType::Ffmpeg, Some(PathBuf::from("/custom/ffmpeg")));
        assert_eq!(path, PathBuf::from("/custom/ffmpeg"));
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let info = probe_tool(ToolType::YtDlp, Path::new("definitely-not-installed-3c1d"));
        assert!(!info.is_available);
        assert!(info.version.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn version_is_first_stdout_line() {
        let dir = tempfile::tempdir().unwrap();
        let bin = crate::test_support::write_script(
            dir.path(),
            "ffprobe",
            "echo 'ffprobe version 6.1 Copyright'\necho 'built with gcc'",
        );
        let info = probe_tool(ToolType::Ffprobe, &bin);
        assert!(info.is_available);
        assert_eq!(info.version.as_deref(), Some("ffprobe version 6.1 Copyright"));
    }
}
