use std::process::Command;

use datatype::{Error, InstallCode, InstallOutcome};
use pacman::PackageManager;


/// Shells out to `rpm`, following the same process-exec-and-parse shape as
/// `deb`.
pub struct RpmManager;

impl PackageManager for RpmManager {
    fn install(&self, path: &str) -> Result<InstallOutcome, Error> {
        let output = Command::new("rpm")
            .arg("-U")
            .arg(path)
            .output()
            .map_err(|err| Error::PacMan(format!("rpm -U {}: {}", path, err)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let already_installed = stderr.contains("already installed");

        match output.status.code() {
            Some(0) if already_installed => Ok(InstallOutcome::new(InstallCode::AlreadyProcessed, stderr)),
            Some(0) => Ok(InstallOutcome::ok(stdout)),
            _ => Ok(InstallOutcome::new(InstallCode::InstallFailed, format!("stdout: {}\nstderr: {}", stdout, stderr))),
        }
    }

    fn get_current(&self) -> Result<String, Error> {
        let output = Command::new("rpm")
            .arg("-qa")
            .arg("--queryformat")
            .arg("%{NAME} %{VERSION}-%{RELEASE}\n")
            .output()
            .map_err(|err| Error::PacMan(format!("rpm -qa: {}", err)))?;
        let stdout = String::from_utf8(output.stdout)?;
        Ok(stdout.lines().last().unwrap_or("").trim().to_string())
    }
}
