//! 7-Zip extraction

use sideload_core::{ArchiveTool, ToolError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::process::{resolve_tool, run_checked};

const TOOL: &str = "7-Zip";

/// `7zz` executable wrapper
#[derive(Debug, Clone)]
pub struct SevenZip {
    path: PathBuf,
}

impl SevenZip {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate `7zz` (or `7z`) from configuration or `PATH`
    pub fn locate(configured: Option<&Path>) -> Result<Self, ToolError> {
        resolve_tool(TOOL, configured, &["7zz", "7z"]).map(Self::new)
    }
}

/// Arguments for a full-path, overwrite-all extraction.
///
/// An empty password still passes `-p` so 7-Zip never prompts on stdin.
fn extract_args(archive: &Path, dest_dir: &Path, password: &str) -> Vec<OsString> {
    let mut output_flag = OsString::from("-o");
    output_flag.push(dest_dir);

    vec![
        "x".into(),
        "-aoa".into(),
        "-bsp2".into(),
        output_flag,
        format!("-p{}", password).into(),
        archive.into(),
    ]
}

impl ArchiveTool for SevenZip {
    fn extract(&self, archive: &Path, dest_dir: &Path, password: &str) -> Result<(), ToolError> {
        info!(archive = %archive.display(), dest = %dest_dir.display(), "Extracting");
        std::fs::create_dir_all(dest_dir)?;
        run_checked(
            TOOL,
            Command::new(&self.path).args(extract_args(archive, dest_dir, password)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_args() {
        let args = extract_args(
            Path::new("/cache/abc/demo.7z.001"),
            Path::new("/home/u/dl"),
            "secret",
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["x", "-aoa", "-bsp2", "-o/home/u/dl", "-psecret", "/cache/abc/demo.7z.001"]
        );
    }

    #[test]
    fn test_empty_password_still_passed() {
        let args = extract_args(Path::new("a.7z"), Path::new("out"), "");
        assert!(args.iter().any(|a| a == "-p"));
    }
}
