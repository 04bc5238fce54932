//! The Uptane metadata verification engine: root rotation, the
//! timestamp → snapshot → targets chain, delegation resolution and the
//! Director/Image target resolver.

pub mod delegation;
pub mod resolver;
pub mod root;
pub mod verifier;

use chrono::{DateTime, Utc};
use hex;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use datatype::crypto;
use datatype::tuf::{RoleName, Root, Snapshot, Targets, Timestamp, TufMeta};
use datatype::Error;

pub use self::delegation::resolve_target;
pub use self::resolver::{resolve_plan, KnownEcu, PlanEntry};
pub use self::root::rotate_root;
pub use self::verifier::{verify_signed, KeyRing};


/// Which of the two Uptane repositories a verification pass is against
///. Carried only for logging; the chain
/// logic itself is identical for both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repo {
    Director,
    Image,
}

impl Display for Repo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Repo::Director => write!(f, "director"),
            Repo::Image    => write!(f, "image"),
        }
    }
}

/// The persisted role set for one repository. `delegated` holds every
/// delegated targets role already fetched and verified this cycle, keyed by
/// delegation name.
#[derive(Default, Clone)]
pub struct RepoState {
    pub root: Option<Root>,
    pub timestamp: Option<Timestamp>,
    pub snapshot: Option<Snapshot>,
    pub targets: Option<Targets>,
    pub delegated: HashMap<String, Targets>,
}

/// Run the timestamp → snapshot → targets chain for one repository,
/// rotating root first. `fetch(role, version)`
/// returns the raw signed bytes for that role (`None` for "no such
/// version", used only during root rotation), and should already apply the
/// per-role size cap.
///
/// Returns `Ok(true)` if new metadata was accepted, `Ok(false)` if the
/// timestamp version was unchanged (no update available). A failed chain
/// step leaves `state` untouched.
pub fn update_repository<F>(repo: Repo, state: &mut RepoState, mut fetch: F, now: DateTime<Utc>) -> Result<bool, Error>
where
    F: FnMut(RoleName, Option<u64>) -> Result<Option<Vec<u8>>, Error>,
{
    debug!("updating {} repository metadata", repo);

    let root = rotate_root(state.root.take(), |version| fetch(RoleName::Root, Some(version)), now)?;
    let keyring = KeyRing::from_root(&root);

    let persisted_ts_version = state.timestamp.as_ref().map(|ts| ts.version).unwrap_or(0);
    let raw_ts = fetch(RoleName::Timestamp, None)?
        .ok_or_else(|| Error::VerifyMalformedDocument(format!("{}: no timestamp.json available", repo)))?;
    let new_timestamp: Timestamp = verify_signed(&raw_ts, &keyring, RoleName::Timestamp, persisted_ts_version, now)?;

    if state.timestamp.as_ref().map(|ts| ts.version) == Some(new_timestamp.version) {
        trace!("{}: timestamp version {} unchanged, no update", repo, new_timestamp.version);
        state.root = Some(root);
        return Ok(false);
    }

    let snapshot_meta = new_timestamp.snapshot_meta()?.clone();
    let raw_snapshot = fetch(RoleName::Snapshot, None)?
        .ok_or_else(|| Error::VerifyMalformedDocument(format!("{}: no snapshot.json available", repo)))?;
    check_meta(&raw_snapshot, &snapshot_meta)?;
    let persisted_snap_version = state.snapshot.as_ref().map(|s| s.version).unwrap_or(0);
    let new_snapshot: Snapshot = verify_signed(&raw_snapshot, &keyring, RoleName::Snapshot, persisted_snap_version, now)?;
    check_declared_version(new_snapshot.version, snapshot_meta.version, RoleName::Snapshot)?;

    let targets_meta = new_snapshot.targets_meta()?.clone();
    let raw_targets = fetch(RoleName::Targets, None)?
        .ok_or_else(|| Error::VerifyMalformedDocument(format!("{}: no targets.json available", repo)))?;
    check_meta(&raw_targets, &targets_meta)?;
    let persisted_targets_version = state.targets.as_ref().map(|t| t.version).unwrap_or(0);
    let new_targets: Targets = verify_signed(&raw_targets, &keyring, RoleName::Targets, persisted_targets_version, now)?;
    check_declared_version(new_targets.version, targets_meta.version, RoleName::Targets)?;

    state.root = Some(root);
    state.timestamp = Some(new_timestamp);
    state.snapshot = Some(new_snapshot);
    state.targets = Some(new_targets);
    info!("{}: metadata accepted up to targets version {}", repo, state.targets.as_ref().unwrap().version);
    Ok(true)
}

fn check_declared_version(actual: u64, declared: Option<u64>, role: RoleName) -> Result<(), Error> {
    match declared {
        Some(expected) if expected != actual => Err(Error::VerifyMalformedDocument(format!(
            "{} version {} does not match the version its parent declared ({})",
            role, actual, expected
        ))),
        _ => Ok(()),
    }
}

/// Check a fetched role blob's length and any declared hashes against the
/// parent role's meta entry.
fn check_meta(raw: &[u8], meta: &TufMeta) -> Result<(), Error> {
    if raw.len() as u64 != meta.length {
        return Err(Error::VerifyLengthMismatch(format!(
            "expected {} bytes, got {}",
            meta.length,
            raw.len()
        )));
    }
    for (alg, expected) in &meta.hashes {
        let actual = match alg.as_str() {
            "sha256" => hex::encode(crypto::sha256(raw)),
            "sha512" => hex::encode(crypto::sha512(raw)),
            _ => continue,
        };
        if &actual != expected {
            return Err(Error::VerifyHashMismatch(format!("{}: expected {}, got {}", alg, expected, actual)));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use datatype::key::{KeyType, KeyValue, PrivateKey, PublicKey};
    use datatype::tuf::{RoleKeys, Signed};
    use maplit::{hashmap, hashset};
    use serde_json as json;

    fn make_ed25519_keypair() -> (PublicKey, PrivateKey) {
        let (public_der, private_der) = crypto::generate_keypair(KeyType::Ed25519).unwrap();
        let public = PublicKey {
            keytype: KeyType::Ed25519,
            keyval: KeyValue { public: hex::encode(&public_der) },
        };
        let keyid = public.key_id().unwrap();
        let private = PrivateKey { keyid, keytype: KeyType::Ed25519, der_key: private_der };
        (public, private)
    }

    fn make_root(public: &PublicKey, keyid: &str) -> Root {
        Root {
            _type: RoleName::Root,
            version: 1,
            expires: "2999-01-01T00:00:00Z".parse().unwrap(),
            keys: hashmap! { keyid.to_string() => public.clone() },
            roles: hashmap! {
                RoleName::Root => RoleKeys { keyids: hashset!{ keyid.to_string() }, threshold: 1 },
                RoleName::Timestamp => RoleKeys { keyids: hashset!{ keyid.to_string() }, threshold: 1 },
                RoleName::Snapshot => RoleKeys { keyids: hashset!{ keyid.to_string() }, threshold: 1 },
                RoleName::Targets => RoleKeys { keyids: hashset!{ keyid.to_string() }, threshold: 1 },
            },
        }
    }

    #[test]
    fn test_update_repository_full_chain() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let root = make_root(&public, &keyid);
        let raw_root = json::to_vec(&Signed::sign(root, &private).unwrap()).unwrap();

        let targets = Targets {
            _type: RoleName::Targets,
            version: 1,
            expires: "2999-01-01T00:00:00Z".parse().unwrap(),
            targets: hashmap!{},
            delegations: None,
        };
        let raw_targets = json::to_vec(&Signed::sign(targets, &private).unwrap()).unwrap();

        let snapshot = Snapshot {
            _type: RoleName::Snapshot,
            version: 1,
            expires: "2999-01-01T00:00:00Z".parse().unwrap(),
            meta: hashmap! {
                "targets.json".to_string() => TufMeta {
                    length: raw_targets.len() as u64,
                    hashes: hashmap!{ "sha256".to_string() => hex::encode(crypto::sha256(&raw_targets)) },
                    version: Some(1),
                }
            },
        };
        let raw_snapshot = json::to_vec(&Signed::sign(snapshot, &private).unwrap()).unwrap();

        let timestamp = Timestamp {
            _type: RoleName::Timestamp,
            version: 1,
            expires: "2999-01-01T00:00:00Z".parse().unwrap(),
            meta: hashmap! {
                "snapshot.json".to_string() => TufMeta {
                    length: raw_snapshot.len() as u64,
                    hashes: hashmap!{ "sha256".to_string() => hex::encode(crypto::sha256(&raw_snapshot)) },
                    version: Some(1),
                }
            },
        };
        let raw_timestamp = json::to_vec(&Signed::sign(timestamp, &private).unwrap()).unwrap();

        let mut state = RepoState::default();
        let updated = update_repository(
            Repo::Director,
            &mut state,
            |role, version| match (role, version) {
                (RoleName::Root, Some(1)) => Ok(Some(raw_root.clone())),
                (RoleName::Root, Some(_)) => Ok(None),
                (RoleName::Timestamp, None) => Ok(Some(raw_timestamp.clone())),
                (RoleName::Snapshot, None) => Ok(Some(raw_snapshot.clone())),
                (RoleName::Targets, None) => Ok(Some(raw_targets.clone())),
                _ => Ok(None),
            },
            Utc::now(),
        ).unwrap();

        assert!(updated);
        assert_eq!(state.targets.unwrap().version, 1);
    }

    #[test]
    fn test_update_repository_no_change_when_timestamp_same_version() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let root = make_root(&public, &keyid);
        let raw_root = json::to_vec(&Signed::sign(root, &private).unwrap()).unwrap();

        let timestamp = Timestamp {
            _type: RoleName::Timestamp,
            version: 1,
            expires: "2999-01-01T00:00:00Z".parse().unwrap(),
            meta: hashmap! { "snapshot.json".to_string() => TufMeta { length: 1, hashes: hashmap!{}, version: None } },
        };
        let raw_timestamp = json::to_vec(&Signed::sign(timestamp.clone(), &private).unwrap()).unwrap();

        let mut state = RepoState::default();
        state.timestamp = Some(timestamp);

        let updated = update_repository(
            Repo::Image,
            &mut state,
            |role, version| match (role, version) {
                (RoleName::Root, Some(1)) => Ok(Some(raw_root.clone())),
                (RoleName::Root, Some(_)) => Ok(None),
                (RoleName::Timestamp, None) => Ok(Some(raw_timestamp.clone())),
                _ => Ok(None),
            },
            Utc::now(),
        ).unwrap();

        assert!(!updated);
    }
}
