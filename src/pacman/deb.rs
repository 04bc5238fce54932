use std::process::Command;

use datatype::{Error, InstallCode, InstallOutcome};
use pacman::PackageManager;


/// Shells out to `dpkg` to install a `.deb` package.
pub struct DebManager;

impl PackageManager for DebManager {
    fn install(&self, path: &str) -> Result<InstallOutcome, Error> {
        let output = Command::new("dpkg")
            .arg("-E")
            .arg("-i")
            .arg(path)
            .output()
            .map_err(|err| Error::PacMan(format!("dpkg -E -i {}: {}", path, err)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let already_installed = stdout.contains("already installed");

        match output.status.code() {
            Some(0) if already_installed => Ok(InstallOutcome::new(InstallCode::AlreadyProcessed, stdout)),
            Some(0) => Ok(InstallOutcome::ok(stdout)),
            _ => Ok(InstallOutcome::new(InstallCode::InstallFailed, format!("stdout: {}\nstderr: {}", stdout, stderr))),
        }
    }

    fn get_current(&self) -> Result<String, Error> {
        let output = Command::new("dpkg-query")
            .arg("-f=${Package} ${Version}\n")
            .arg("-W")
            .output()
            .map_err(|err| Error::PacMan(format!("dpkg-query -W: {}", err)))?;
        let stdout = String::from_utf8(output.stdout)?;
        Ok(stdout.lines().last().unwrap_or("").trim().to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deb_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<DebManager>();
    }
}
