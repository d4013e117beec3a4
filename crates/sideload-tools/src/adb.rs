//! Android Debug Bridge client
//!
//! Thin wrapper over the `adb` executable. Parsing is kept in free functions
//! so it can be tested without a device attached.

use sideload_core::{DeviceBridge, DeviceId, ToolError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::process::{resolve_tool, run_checked};

const TOOL: &str = "adb";

/// Root of per-package data files on the device
pub const OBB_ROOT: &str = "/sdcard/Android/obb/";

/// One bridge invocation needed to install a set of files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStep {
    /// `install -r <apk>`
    InstallApk(PathBuf),
    /// `shell mkdir -p <dir>`
    MakeDir(String),
    /// `push <source> <dest>`
    Push { source: PathBuf, dest: String },
}

impl InstallStep {
    fn args(&self) -> Vec<OsString> {
        match self {
            Self::InstallApk(apk) => vec!["install".into(), "-r".into(), apk.into()],
            Self::MakeDir(dir) => vec!["shell".into(), "mkdir".into(), "-p".into(), dir.into()],
            Self::Push { source, dest } => vec!["push".into(), source.into(), dest.into()],
        }
    }
}

/// Work out the bridge calls for installing `files` under `package_name`.
///
/// APKs are installed with replace, directories are pushed under the OBB root
/// as-is, and loose `.obb` files go into the package's OBB directory.
pub fn plan_install(package_name: &str, files: &[PathBuf]) -> Result<Vec<InstallStep>, ToolError> {
    let package_obb_dir = format!("{}{}/", OBB_ROOT, package_name);
    let mut steps = Vec::new();
    let mut made_obb_dir = false;

    for file in files {
        if file.is_dir() {
            steps.push(InstallStep::Push {
                source: file.clone(),
                dest: OBB_ROOT.to_string(),
            });
            continue;
        }

        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("apk") => steps.push(InstallStep::InstallApk(file.clone())),
            Some("obb") => {
                if package_name.is_empty() {
                    return Err(ToolError::UnsupportedFile(file.clone()));
                }
                if !made_obb_dir {
                    steps.push(InstallStep::MakeDir(package_obb_dir.clone()));
                    made_obb_dir = true;
                }
                steps.push(InstallStep::Push {
                    source: file.clone(),
                    dest: package_obb_dir.clone(),
                });
            }
            _ => return Err(ToolError::UnsupportedFile(file.clone())),
        }
    }

    Ok(steps)
}

/// Parse `adb devices` output into `(serial, status token)` pairs
pub fn parse_devices_output(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            // "<serial>\t<state>", state may contain spaces ("no permissions (...)")
            let (serial, state) = line.split_once(char::is_whitespace)?;
            Some((serial.to_string(), state.trim().to_string()))
        })
        .collect()
}

/// Parse `pm list packages` output, stripping the `package:` prefix
pub fn parse_packages_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `adb` executable wrapper
#[derive(Debug, Clone)]
pub struct AdbBridge {
    path: PathBuf,
}

impl AdbBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate `adb` from configuration or `PATH`
    pub fn locate(configured: Option<&Path>) -> Result<Self, ToolError> {
        resolve_tool(TOOL, configured, &["adb"]).map(Self::new)
    }

    fn command(&self) -> Command {
        Command::new(&self.path)
    }

    fn device_command(&self, device: &DeviceId) -> Command {
        let mut command = self.command();
        command.arg("-s").arg(device.as_str());
        command
    }
}

impl DeviceBridge for AdbBridge {
    fn list_devices(&self) -> Result<Vec<(String, String)>, ToolError> {
        let output = run_checked(TOOL, self.command().arg("devices"))?;
        Ok(parse_devices_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn get_property(&self, device: &DeviceId, name: &str) -> Result<String, ToolError> {
        let output = run_checked(
            TOOL,
            self.device_command(device).args(["shell", "getprop", name]),
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn install_files(
        &self,
        package_name: &str,
        files: &[PathBuf],
        device: &DeviceId,
    ) -> Result<(), ToolError> {
        let steps = plan_install(package_name, files)?;
        info!(device = %device, package = package_name, steps = steps.len(), "Installing files");

        for step in &steps {
            debug!(device = %device, ?step, "adb");
            let output = run_checked(TOOL, self.device_command(device).args(step.args()))?;

            // `adb install` can exit 0 and still report a failure
            if let InstallStep::InstallApk(_) = step {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if let Some(line) = stdout.lines().find(|l| l.starts_with("Failure")) {
                    return Err(ToolError::Output {
                        tool: TOOL.to_string(),
                        detail: line.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn list_third_party_packages(&self, device: &DeviceId) -> Result<Vec<String>, ToolError> {
        let output = run_checked(
            TOOL,
            self.device_command(device)
                .args(["shell", "pm", "list", "packages", "-3"]),
        )?;
        Ok(parse_packages_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn start_server(&self) -> Result<(), ToolError> {
        run_checked(TOOL, self.command().arg("start-server"))?;
        debug!("adb server started");
        Ok(())
    }

    fn kill_server(&self) -> Result<(), ToolError> {
        run_checked(TOOL, self.command().arg("kill-server"))?;
        debug!("adb server killed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_devices_output() {
        let output = "* daemon not running; starting now at tcp:5037\n\
                      * daemon started successfully\n\
                      List of devices attached\n\
                      1WMHH000000000\tdevice\n\
                      2WMHH000000001\tunauthorized\n\
                      3WMHH000000002\tno permissions (user in plugdev group; are your udev rules wrong?)\n\
                      \n";

        let devices = parse_devices_output(output);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0], ("1WMHH000000000".to_string(), "device".to_string()));
        assert_eq!(devices[1].1, "unauthorized");
        assert!(devices[2].1.starts_with("no permissions"));
    }

    #[test]
    fn test_parse_devices_output_empty() {
        assert!(parse_devices_output("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn test_parse_packages_output() {
        let output = "package:com.beatgames.beatsaber\r\npackage:com.demo.app\n\nnoise\n";
        assert_eq!(
            parse_packages_output(output),
            vec!["com.beatgames.beatsaber", "com.demo.app"]
        );
    }

    #[test]
    fn test_plan_install() {
        let temp_dir = TempDir::new().unwrap();
        let obb_dir = temp_dir.path().join("com.demo.app");
        std::fs::create_dir(&obb_dir).unwrap();
        let apk = temp_dir.path().join("demo.apk");
        let obb = temp_dir.path().join("main.1.com.demo.app.obb");
        std::fs::write(&apk, b"").unwrap();
        std::fs::write(&obb, b"").unwrap();

        let steps = plan_install("com.demo.app", &[apk.clone(), obb_dir.clone(), obb.clone()]).unwrap();
        assert_eq!(
            steps,
            vec![
                InstallStep::InstallApk(apk),
                InstallStep::Push {
                    source: obb_dir,
                    dest: OBB_ROOT.to_string()
                },
                InstallStep::MakeDir("/sdcard/Android/obb/com.demo.app/".to_string()),
                InstallStep::Push {
                    source: obb,
                    dest: "/sdcard/Android/obb/com.demo.app/".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_plan_install_rejects_unknown_files() {
        let temp_dir = TempDir::new().unwrap();
        let readme = temp_dir.path().join("readme.txt");
        std::fs::write(&readme, b"").unwrap();

        assert!(matches!(
            plan_install("com.demo.app", &[readme]),
            Err(ToolError::UnsupportedFile(_))
        ));
    }

    #[test]
    fn test_plan_install_obb_needs_package() {
        let temp_dir = TempDir::new().unwrap();
        let obb = temp_dir.path().join("main.obb");
        std::fs::write(&obb, b"").unwrap();

        assert!(plan_install("", &[obb]).is_err());
    }

    #[test]
    fn test_step_args() {
        let step = InstallStep::InstallApk(PathBuf::from("/tmp/a.apk"));
        assert_eq!(
            step.args(),
            vec![OsString::from("install"), "-r".into(), "/tmp/a.apk".into()]
        );
    }
}
