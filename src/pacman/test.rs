use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::prelude::*;

use datatype::{Error, InstallCode, InstallOutcome};
use pacman::PackageManager;


/// An in-memory-ish backend that writes the path of every successful
/// install to a file, one per line, and reports the last line back as the
/// current hash.
pub struct TestManager {
    filename: String,
    succeeds: bool,
}

impl TestManager {
    pub fn new(filename: String, succeeds: bool) -> Self {
        TestManager { filename, succeeds }
    }

    /// Build a `TestManager` writing to a freshly named temp file.
    pub fn new_tpm(succeeds: bool) -> Self {
        let name = format!("/tmp/sota-tpm-{}", Utc::now().timestamp_nanos());
        if succeeds {
            let _ = File::create(&name).expect("create tpm file");
        }
        TestManager::new(name, succeeds)
    }
}

impl PackageManager for TestManager {
    fn install(&self, path: &str) -> Result<InstallOutcome, Error> {
        if !self.succeeds {
            return Ok(InstallOutcome::new(InstallCode::InstallFailed, format!("{}: configured to fail", path)));
        }
        let mut file = OpenOptions::new().create(true).write(true).append(true).open(&self.filename)?;
        file.write_all(format!("{}\n", path).as_bytes())?;
        Ok(InstallOutcome::ok(path.to_string()))
    }

    fn get_current(&self) -> Result<String, Error> {
        let contents = fs::read_to_string(&self.filename).unwrap_or_default();
        Ok(contents.lines().last().unwrap_or("").to_string())
    }
}

/// Encapsulates a directory whose contents are destroyed when it drops out
/// of scope, used by test fixtures across the crate.
pub struct TestDir(pub String);

impl TestDir {
    pub fn new(reason: &str) -> TestDir {
        let dir = format!("/tmp/{}-{}", reason, Utc::now().timestamp_nanos());
        fs::create_dir_all(&dir).expect("create tempdir");
        TestDir(dir)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// For each item in the list, assert that it equals the next value received
/// on `rx`.
pub fn assert_rx<X: PartialEq + ::std::fmt::Debug>(rx: &crossbeam_channel::Receiver<X>, xs: &[X]) {
    let mut xs = xs.iter();
    for _ in 0..xs.len() {
        let val = rx.recv().expect("assert_rx expected another val");
        assert_eq!(val, *xs.next().expect("assert_rx: list shorter than received values"));
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_then_get_current() {
        let dir = TestDir::new("sota-tpm-test");
        let path = format!("{}/tpm", dir.0);
        let pm = TestManager::new(path, true);

        pm.install("fw-v1").unwrap();
        pm.install("fw-v2").unwrap();
        assert_eq!(pm.get_current().unwrap(), "fw-v2");
    }

    #[test]
    fn test_failing_manager_never_writes() {
        let dir = TestDir::new("sota-tpm-test-fail");
        let path = format!("{}/tpm", dir.0);
        let pm = TestManager::new(path, false);

        let outcome = pm.install("fw-v1").unwrap();
        assert_eq!(outcome.code, InstallCode::InstallFailed);
        assert_eq!(pm.get_current().unwrap(), "");
    }
}
