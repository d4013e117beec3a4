//! rclone client for the HTTP mirror

use regex::Regex;
use sideload_core::{DownloadTool, ToolError};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::process::{resolve_tool, run_checked};

const TOOL: &str = "rclone";

/// Incremental parser for `rclone --progress` output.
///
/// rclone redraws its progress block with carriage returns, so the stream is
/// split on both `\r` and `\n`. Only changes in the reported percentage are
/// surfaced.
pub struct ProgressParser {
    pending: String,
    last: Option<u8>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            last: None,
        }
    }

    /// Feed a chunk of output; returns any new percentages in order
    pub fn feed(&mut self, chunk: &str) -> Vec<u8> {
        self.pending.push_str(chunk);
        let mut updates = Vec::new();

        while let Some(pos) = self.pending.find(['\r', '\n']) {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(percent) = self.parse_line(&line) {
                if self.last != Some(percent) {
                    self.last = Some(percent);
                    updates.push(percent);
                }
            }
        }

        updates
    }

    fn parse_line(&self, line: &str) -> Option<u8> {
        let caps = progress_pattern().captures(line)?;
        let value: u32 = caps.get(1)?.as_str().parse().ok()?;
        Some(value.min(100) as u8)
    }
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // "Transferred:   1.2 GiB / 2.0 GiB, 61%, 10 MiB/s, ETA 1m"
        Regex::new(r"(\d+)%, ").unwrap()
    })
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `rclone` executable bound to one mirror base URI
#[derive(Debug, Clone)]
pub struct Rclone {
    path: PathBuf,
    base_uri: String,
}

impl Rclone {
    pub fn new(path: impl Into<PathBuf>, base_uri: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            base_uri: base_uri.into(),
        }
    }

    /// Locate `rclone` from configuration or `PATH`
    pub fn locate(configured: Option<&Path>, base_uri: impl Into<String>) -> Result<Self, ToolError> {
        resolve_tool(TOOL, configured, &["rclone"]).map(|path| Self::new(path, base_uri))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg("--http-url")
            .arg(&self.base_uri)
            .args(["--tpslimit", "1.0", "--tpslimit-burst", "3"]);
        command
    }
}

impl DownloadTool for Rclone {
    fn copy(
        &self,
        source_id: &str,
        dest_dir: &Path,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<(), ToolError> {
        info!(id = source_id, dest = %dest_dir.display(), "Downloading");

        let mut child = self
            .command()
            .arg("copy")
            .arg(format!(":http:/{}", source_id))
            .arg(dest_dir)
            .args(["--transfers", "1", "--multi-thread-streams", "0", "--progress"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: TOOL.to_string(),
                source,
            })?;

        // Drain stderr on its own thread so a chatty rclone cannot block on a full pipe
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let streamed = match child.stdout.take() {
            Some(mut stdout) => stream_progress(&mut stdout, on_progress),
            None => Ok(()),
        };
        if let Err(e) = streamed {
            reap(&mut child);
            if let Some(handle) = stderr_reader {
                let _ = handle.join();
            }
            return Err(e.into());
        }

        let status = child.wait()?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Failed {
                tool: TOOL.to_string(),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!(id = source_id, "Download complete");
        Ok(())
    }

    fn sync(&self, file_name: &str, dest_dir: &Path) -> Result<(), ToolError> {
        info!(file = file_name, dest = %dest_dir.display(), "Syncing");
        run_checked(
            TOOL,
            self.command()
                .arg("sync")
                .arg(format!(":http:/{}", file_name))
                .arg(dest_dir),
        )?;
        Ok(())
    }
}

/// Read `--progress` output until EOF, reporting each new percentage
fn stream_progress(output: &mut impl Read, on_progress: &mut dyn FnMut(u8)) -> std::io::Result<()> {
    let mut parser = ProgressParser::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = output.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        for percent in parser.feed(&String::from_utf8_lossy(&buf[..n])) {
            on_progress(percent);
        }
    }
}

/// Kill a child that is being abandoned and collect its exit status
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Failed to kill {}", TOOL);
    }
    let _ = child.wait();
}
