//! The metadata store and persisted device state. A keyed blob store for role documents, buffered
//! within a cycle and committed atomically at cycle end so a reader never
//! observes a half-updated repository; plus the small bit of device state
//! that survives restarts (the ECU-to-installed-hash map).

use serde_json as json;
use std::collections::HashMap;

use datatype::tuf::RoleName;
use datatype::{EcuSerial, Error, Util};
use uptane::Repo;


/// A keyed blob store for role documents. Writes made with `put`
/// are buffered in memory; nothing reaches disk until `commit`.
pub trait MetadataStore: Send {
    fn put(&mut self, repo: Repo, role: RoleName, version: u64, bytes: Vec<u8>);
    fn get(&self, repo: Repo, role: RoleName, version: Option<u64>) -> Result<Vec<u8>, Error>;
    fn latest_version(&self, repo: Repo, role: RoleName) -> Result<u64, Error>;
    fn commit(&mut self) -> Result<(), Error>;
}

/// A `MetadataStore` backed by plain files under a root directory, one file
/// per `(repo, role, version)` plus a small marker file recording the
/// latest version for that `(repo, role)` pair.
pub struct FileMetadataStore {
    root: String,
    pending: Vec<(Repo, RoleName, u64, Vec<u8>)>,
}

impl FileMetadataStore {
    pub fn new(root: String) -> Self {
        FileMetadataStore { root, pending: Vec::new() }
    }

    fn role_dir(&self, repo: Repo, role: RoleName) -> String {
        format!("{}/{}/{}", self.root, repo, role)
    }

    fn version_path(&self, repo: Repo, role: RoleName, version: u64) -> String {
        format!("{}/{}.json", self.role_dir(repo, role), version)
    }

    fn latest_marker(&self, repo: Repo, role: RoleName) -> String {
        format!("{}/latest", self.role_dir(repo, role))
    }
}

impl MetadataStore for FileMetadataStore {
    fn put(&mut self, repo: Repo, role: RoleName, version: u64, bytes: Vec<u8>) {
        self.pending.push((repo, role, version, bytes));
    }

    fn get(&self, repo: Repo, role: RoleName, version: Option<u64>) -> Result<Vec<u8>, Error> {
        let version = match version {
            Some(version) => version,
            None => self.latest_version(repo, role)?,
        };
        Util::read_file(&self.version_path(repo, role, version))
    }

    fn latest_version(&self, repo: Repo, role: RoleName) -> Result<u64, Error> {
        let marker = self.latest_marker(repo, role);
        if !Util::file_exists(&marker) {
            return Ok(0);
        }
        let bytes = Util::read_file(&marker)?;
        let text = String::from_utf8(bytes)?;
        text.trim()
            .parse::<u64>()
            .map_err(|err| Error::Parse(format!("bad latest-version marker at {}: {}", marker, err)))
    }

    fn commit(&mut self) -> Result<(), Error> {
        for (repo, role, version, bytes) in self.pending.drain(..) {
            Util::write_file_atomic(&self.version_path(repo, role, version), &bytes)?;
            Util::write_file_atomic(&self.latest_marker(repo, role), version.to_string().as_bytes())?;
        }
        Ok(())
    }
}


/// The small slice of device state that must survive a restart: which
/// content hash is currently installed on each known ECU. Role documents and keys are not part of this
/// struct; they live in the `MetadataStore` and the configured key paths
/// respectively.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct DeviceState {
    pub installed: HashMap<EcuSerial, String>,
}

impl DeviceState {
    pub fn load(path: &str) -> Result<DeviceState, Error> {
        if !Util::file_exists(path) {
            return Ok(DeviceState::default());
        }
        let bytes = Util::read_file(path)?;
        Ok(json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &str) -> Result<(), Error> {
        Util::write_file_atomic(path, &json::to_vec(self)?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_before_commit_sees_nothing() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileMetadataStore::new(dir.path().to_str().unwrap().to_string());
        store.put(Repo::Director, RoleName::Root, 1, b"root-v1".to_vec());
        assert!(store.get(Repo::Director, RoleName::Root, Some(1)).is_err());
        assert_eq!(store.latest_version(Repo::Director, RoleName::Root).unwrap(), 0);
    }

    #[test]
    fn test_commit_makes_puts_visible_and_updates_latest() {
        let dir = tempdir().expect("tempdir");
        let mut store = FileMetadataStore::new(dir.path().to_str().unwrap().to_string());
        store.put(Repo::Image, RoleName::Targets, 1, b"targets-v1".to_vec());
        store.put(Repo::Image, RoleName::Targets, 2, b"targets-v2".to_vec());
        store.commit().expect("commit");

        assert_eq!(store.get(Repo::Image, RoleName::Targets, Some(1)).unwrap(), b"targets-v1");
        assert_eq!(store.get(Repo::Image, RoleName::Targets, None).unwrap(), b"targets-v2");
        assert_eq!(store.latest_version(Repo::Image, RoleName::Targets).unwrap(), 2);
    }

    #[test]
    fn test_device_state_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let mut state = DeviceState::default();
        state.installed.insert(EcuSerial("ecu-1".into()), "abc123".into());
        state.save(path).expect("save");

        let loaded = DeviceState::load(path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_device_state_defaults_when_missing() {
        let state = DeviceState::load("/nonexistent/path/state.json").expect("load");
        assert!(state.installed.is_empty());
    }
}
