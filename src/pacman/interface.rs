use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde::ser::{Serialize, Serializer};
use std::str::FromStr;

use datatype::{Error, InstallOutcome};
use pacman::deb::DebManager;
use pacman::ostree::OstreeManager;
use pacman::rpm::RpmManager;
use pacman::test::TestManager;


/// The package manager collaborator: installs one target and reports what is currently
/// installed, as an opaque content hash the orchestrator compares against
/// the director's target hash. Nothing above this trait cares how a backend
/// gets there.
pub trait PackageManager: Send {
    fn install(&self, path: &str) -> Result<InstallOutcome, Error>;
    fn get_current(&self) -> Result<String, Error>;
}

/// Which concrete `PackageManager` a device is configured to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Off,
    Deb,
    Rpm,
    Ostree { os_name: String },
    Test { filename: String, succeeds: bool },
}

impl Backend {
    /// Build the concrete collaborator this backend names.
    pub fn build(&self) -> Box<dyn PackageManager> {
        match *self {
            Backend::Off => Box::new(NoPackageManager),
            Backend::Deb => Box::new(DebManager),
            Backend::Rpm => Box::new(RpmManager),
            Backend::Ostree { ref os_name } => Box::new(OstreeManager::new(os_name.clone())),
            Backend::Test { ref filename, succeeds } => Box::new(TestManager::new(filename.clone(), succeeds)),
        }
    }
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Off
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Backend, Error> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Backend::Off),
            "deb" => Ok(Backend::Deb),
            "rpm" => Ok(Backend::Rpm),
            "ostree" => Ok(Backend::Ostree { os_name: "sota".into() }),
            test if test.len() > 5 && &test[..5] == "test:" => {
                Ok(Backend::Test { filename: test[5..].to_string(), succeeds: true })
            }
            _ => Err(Error::Config(format!("unknown package manager backend: {}", s))),
        }
    }
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Backend, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(|err| SerdeError::custom(format!("invalid package manager backend: {}", err)))
    }
}

impl Serialize for Backend {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let s = match *self {
            Backend::Off => "off".to_string(),
            Backend::Deb => "deb".to_string(),
            Backend::Rpm => "rpm".to_string(),
            Backend::Ostree { .. } => "ostree".to_string(),
            Backend::Test { ref filename, .. } => format!("test:{}", filename),
        };
        ser.serialize_str(&s)
    }
}

/// The default, inert backend: a device not yet provisioned with a real
/// package manager can still boot the client, it just can't install.
struct NoPackageManager;

impl PackageManager for NoPackageManager {
    fn install(&self, _path: &str) -> Result<InstallOutcome, Error> {
        Err(Error::PacMan("no package manager configured".into()))
    }

    fn get_current(&self) -> Result<String, Error> {
        Err(Error::PacMan("no package manager configured".into()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("deb".parse::<Backend>().unwrap(), Backend::Deb);
        assert_eq!("RPM".parse::<Backend>().unwrap(), Backend::Rpm);
        assert_eq!("ostree".parse::<Backend>().unwrap(), Backend::Ostree { os_name: "sota".into() });
        assert_eq!(
            "test:/tmp/pm".parse::<Backend>().unwrap(),
            Backend::Test { filename: "/tmp/pm".into(), succeeds: true }
        );
        assert!("bogus".parse::<Backend>().is_err());
    }

    #[test]
    fn test_off_backend_errors_instead_of_panicking() {
        let pm = Backend::Off.build();
        assert!(pm.install("/tmp/x").is_err());
        assert!(pm.get_current().is_err());
    }
}
