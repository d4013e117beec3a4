//! Tool resolution and command execution helpers

use sideload_core::ToolError;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

/// Resolve a tool binary.
///
/// An explicit path from configuration wins; otherwise each candidate name is
/// looked up on `PATH` in order.
pub fn resolve_tool(
    tool: &str,
    configured: Option<&Path>,
    candidates: &[&str],
) -> Result<PathBuf, ToolError> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ToolError::NotFound {
            tool: tool.to_string(),
            reason: format!("configured path {} does not exist", path.display()),
        });
    }

    for name in candidates {
        if let Ok(path) = which::which(name) {
            debug!(tool, path = %path.display(), "Resolved tool");
            return Ok(path);
        }
    }

    Err(ToolError::NotFound {
        tool: tool.to_string(),
        reason: format!("none of {:?} found on PATH", candidates),
    })
}

/// Run a command to completion and fail on a non-zero exit
pub(crate) fn run_checked(tool: &str, command: &mut Command) -> Result<Output, ToolError> {
    trace!(tool, ?command, "Running");
    let output = command.output().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_configured_path_wins() {
        let temp_dir = TempDir::new().unwrap();
        let tool = temp_dir.path().join("adb");
        std::fs::write(&tool, b"").unwrap();

        let resolved = resolve_tool("adb", Some(&tool), &["definitely-not-a-real-tool"]).unwrap();
        assert_eq!(resolved, tool);
    }

    #[test]
    fn test_missing_configured_path() {
        let result = resolve_tool("adb", Some(Path::new("/nonexistent/adb")), &["adb"]);
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }

    #[test]
    fn test_no_candidate_on_path() {
        let result = resolve_tool("7-Zip", None, &["sideload-no-such-binary-7zz"]);
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }
}
