use std::process::Command;
use std::str;

use datatype::{Error, InstallCode, InstallOutcome};
use pacman::PackageManager;


/// Wraps the `ostree` CLI: deploys a commit with
/// `ostree admin deploy` and reads back the currently booted commit with
/// `ostree admin status`. The Rust side only shells out and parses text; it
/// never touches the OSTree repository format directly.
pub struct OstreeManager {
    os_name: String,
}

impl OstreeManager {
    pub fn new(os_name: String) -> Self {
        OstreeManager { os_name }
    }

    fn run(args: &[&str]) -> Result<(bool, String, String), Error> {
        debug!("running `ostree` with args: {:?}", args);
        let output = Command::new("ostree")
            .args(args)
            .output()
            .map_err(|err| Error::PacMan(format!("ostree {:?}: {}", args, err)))?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl PackageManager for OstreeManager {
    fn install(&self, commit: &str) -> Result<InstallOutcome, Error> {
        if self.get_current().ok().as_deref() == Some(commit) {
            return Ok(InstallOutcome::new(InstallCode::AlreadyProcessed, format!("{} already deployed", commit)));
        }
        let (ok, stdout, stderr) = Self::run(&["admin", "deploy", "--karg-proc-cmdline", commit])?;
        if ok {
            Ok(InstallOutcome::ok(stdout))
        } else {
            Ok(InstallOutcome::new(InstallCode::InstallFailed, format!("stdout: {}\nstderr: {}", stdout, stderr)))
        }
    }

    fn get_current(&self) -> Result<String, Error> {
        let (ok, stdout, stderr) = Self::run(&["admin", "status"])?;
        if !ok {
            return Err(Error::PacMan(format!("ostree admin status: {}", stderr)));
        }
        current_commit(&self.os_name, &stdout)
    }
}

/// Parse `ostree admin status` output and return the commit of the starred
/// (currently booted) deployment for `os_name`.
fn current_commit(os_name: &str, stdout: &str) -> Result<String, Error> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('*'))
        .find_map(|line| {
            let tokens: Vec<&str> = line.trim_start_matches('*').split_whitespace().collect();
            match tokens.as_slice() {
                [name, commit] if *name == os_name => Some(commit.split('.').next().unwrap_or(commit).to_string()),
                _ => None,
            }
        })
        .ok_or_else(|| Error::PacMan(format!("no current deployment found for os {}", os_name)))
}


#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN_STATUS: &str = "
          gnome-ostree 67e382b11d213a402a5313e61cbc69dfd5ab93cb07.0
            origin refspec: gnome-ostree/buildmaster/x86_64-runtime
        * gnome-ostree ce19c41036cc45e49b0cecf6b157523c2105c4de1c.0
            origin refspec: gnome-ostree/buildmaster/x86_64-runtime
        ";

    #[test]
    fn test_current_commit_picks_starred_deployment() {
        let commit = current_commit("gnome-ostree", ADMIN_STATUS).expect("current_commit");
        assert_eq!(commit, "ce19c41036cc45e49b0cecf6b157523c2105c4de1c");
    }

    #[test]
    fn test_current_commit_rejects_unknown_os_name() {
        assert!(current_commit("no-such-os", ADMIN_STATUS).is_err());
    }
}
