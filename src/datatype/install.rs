use serde::{Serialize, Serializer};
use std::str::FromStr;

use datatype::Error;


/// The outcome codes a package manager collaborator may report.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallCode {
    Ok = 0,
    InstallFailed,
    DownloadFailed,
    AlreadyProcessed,
    VerificationFailed,
}

impl InstallCode {
    pub fn is_success(&self) -> bool {
        matches!(*self, InstallCode::Ok | InstallCode::AlreadyProcessed)
    }
}

impl Default for InstallCode {
    fn default() -> Self { InstallCode::Ok }
}

impl FromStr for InstallCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<InstallCode, Error> {
        match &*s.to_uppercase() {
            "0" | "OK"                  => Ok(InstallCode::Ok),
            "1" | "INSTALL_FAILED"      => Ok(InstallCode::InstallFailed),
            "2" | "DOWNLOAD_FAILED"     => Ok(InstallCode::DownloadFailed),
            "3" | "ALREADY_PROCESSED"   => Ok(InstallCode::AlreadyProcessed),
            "4" | "VERIFICATION_FAILED" => Ok(InstallCode::VerificationFailed),
            _ => Err(Error::Parse(format!("unknown InstallCode: {}", s))),
        }
    }
}

impl Serialize for InstallCode {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(*self as u64)
    }
}


/// What a package manager backend hands back from `install`:
/// a machine-readable code plus a human-readable message, usually the
/// combined stdout/stderr of the backend's shell-out.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct InstallOutcome {
    pub code: InstallCode,
    pub message: String,
}

impl InstallOutcome {
    pub fn new(code: InstallCode, message: String) -> InstallOutcome {
        InstallOutcome { code, message }
    }

    pub fn ok(message: String) -> InstallOutcome {
        InstallOutcome { code: InstallCode::Ok, message }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_code_roundtrip() {
        for code in &["OK", "INSTALL_FAILED", "DOWNLOAD_FAILED", "ALREADY_PROCESSED", "VERIFICATION_FAILED"] {
            assert!(code.parse::<InstallCode>().is_ok());
        }
        assert!("bogus".parse::<InstallCode>().is_err());
    }

    #[test]
    fn test_is_success() {
        assert!(InstallOutcome::ok("done".into()).is_success());
        assert!(!InstallOutcome::new(InstallCode::InstallFailed, "nope".into()).is_success());
    }
}
