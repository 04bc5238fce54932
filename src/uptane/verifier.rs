use chrono::{DateTime, Utc};
use hex;
use serde::de::DeserializeOwned;
use serde_json as json;
use std::collections::{HashMap, HashSet};

use datatype::canonical::canonicalize;
use datatype::key::PublicKey;
use datatype::tuf::{RoleBody, RoleKeys, RoleName, Root, Signed};
use datatype::Error;


/// The set of keys and thresholds a given root authorizes, flattened out of
/// `Root` for cheap lookup while verifying a chain of role documents.
#[derive(Clone, Debug)]
pub struct KeyRing {
    keys: HashMap<String, PublicKey>,
    roles: HashMap<RoleName, RoleKeys>,
}

impl KeyRing {
    pub fn from_root(root: &Root) -> KeyRing {
        KeyRing {
            keys: root.keys.clone(),
            roles: root.roles.clone(),
        }
    }

    /// Build a `KeyRing` authorizing a single role directly from a
    /// delegation's own key set, rather than from a root document.
    pub fn from_parts(keys: HashMap<String, PublicKey>, role: RoleName, role_keys: RoleKeys) -> KeyRing {
        let mut roles = HashMap::new();
        roles.insert(role, role_keys);
        KeyRing { keys, roles }
    }

    pub fn role_keys(&self, role: RoleName) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }

    pub fn key(&self, keyid: &str) -> Option<&PublicKey> {
        self.keys.get(keyid)
    }
}


/// Verify a signed role document against `keyring`, checking it is the role
/// we asked for, meets its signature threshold, isn't expired as of `now`,
/// and isn't a version rollback relative to `min_version`.
///
/// `min_version` should be the previously-persisted version, or 0 if none is
/// persisted yet; equal versions are accepted as a no-op refetch.
pub fn verify_signed<T>(
    raw: &[u8],
    keyring: &KeyRing,
    role: RoleName,
    min_version: u64,
    now: DateTime<Utc>,
) -> Result<T, Error>
where
    T: DeserializeOwned + RoleBody,
{
    let signed: Signed<json::Value> = json::from_slice(raw)?;
    let role_keys = keyring
        .role_keys(role)
        .ok_or_else(|| Error::VerifyUnknownRole(role.to_string()))?;

    let body = canonicalize(&signed.signed)?;
    let mut counted: HashSet<&str> = HashSet::new();

    for sig in &signed.signatures {
        if counted.contains(sig.keyid.as_str()) {
            continue;
        }
        let key = match keyring.key(&sig.keyid) {
            Some(key) => key,
            None => continue,
        };
        if !role_keys.keyids.contains(&sig.keyid) {
            continue;
        }
        let der_public = key.der_bytes()?;
        let sig_bytes = hex::decode(&sig.sig)?;
        if sig.method.verify_msg(&body, &der_public, &sig_bytes) {
            counted.insert(sig.keyid.as_str());
        }
    }

    if (counted.len() as u64) < role_keys.threshold {
        return Err(Error::VerifyThresholdNotMet(format!(
            "{}: {} of {} required signatures valid",
            role,
            counted.len(),
            role_keys.threshold
        )));
    }

    let parsed: T = json::from_value(signed.signed)?;
    if parsed.role_name() != role {
        return Err(Error::VerifyMalformedDocument(format!(
            "expected {} role, got {}",
            role,
            parsed.role_name()
        )));
    }
    if parsed.version() < min_version {
        return Err(Error::VerifyVersionRollback(format!(
            "{}: persisted version {} is newer than fetched version {}",
            role,
            min_version,
            parsed.version()
        )));
    }
    if parsed.expired(now) {
        return Err(Error::VerifyExpired(role.to_string()));
    }

    Ok(parsed)
}


#[cfg(test)]
mod tests {
    use super::*;
    use datatype::key::{KeyType, KeyValue, PrivateKey};
    use datatype::tuf::{Timestamp, TufMeta};
    use datatype::crypto::generate_keypair;
    use maplit::{hashmap, hashset};

    fn make_ed25519_keypair() -> (PublicKey, PrivateKey) {
        let (public_der, private_der) = generate_keypair(KeyType::Ed25519).unwrap();
        let public = PublicKey {
            keytype: KeyType::Ed25519,
            keyval: KeyValue { public: hex::encode(&public_der) },
        };
        let keyid = public.key_id().unwrap();
        let private = PrivateKey { keyid, keytype: KeyType::Ed25519, der_key: private_der };
        (public, private)
    }

    fn keyring_with(keyid: &str, pubkey: PublicKey, role: RoleName, threshold: u64) -> KeyRing {
        KeyRing {
            keys: hashmap! { keyid.to_string() => pubkey },
            roles: hashmap! { role => RoleKeys { keyids: hashset!{ keyid.to_string() }, threshold } },
        }
    }

    fn signed_timestamp(key: &PrivateKey, version: u64, expires: &str) -> Signed<Timestamp> {
        let ts = Timestamp {
            _type: RoleName::Timestamp,
            version,
            expires: expires.parse().unwrap(),
            meta: hashmap! { "snapshot.json".to_string() => TufMeta { length: 10, hashes: hashmap!{}, version: None } },
        };
        Signed::sign(ts, key).unwrap()
    }

    #[test]
    fn test_verify_signed_accepts_valid_threshold() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let keyring = keyring_with(&keyid, public, RoleName::Timestamp, 1);

        let signed = signed_timestamp(&private, 1, "2999-01-01T00:00:00Z");
        let raw = json::to_vec(&signed).unwrap();
        let ts: Timestamp = verify_signed(&raw, &keyring, RoleName::Timestamp, 0, Utc::now()).unwrap();
        assert_eq!(ts.version, 1);
    }

    #[test]
    fn test_verify_signed_rejects_rollback() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let keyring = keyring_with(&keyid, public, RoleName::Timestamp, 1);

        let signed = signed_timestamp(&private, 1, "2999-01-01T00:00:00Z");
        let raw = json::to_vec(&signed).unwrap();
        let res: Result<Timestamp, Error> = verify_signed(&raw, &keyring, RoleName::Timestamp, 2, Utc::now());
        assert!(matches!(res, Err(Error::VerifyVersionRollback(_))));
    }

    #[test]
    fn test_verify_signed_rejects_expired() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let keyring = keyring_with(&keyid, public, RoleName::Timestamp, 1);

        let signed = signed_timestamp(&private, 1, "2000-01-01T00:00:00Z");
        let raw = json::to_vec(&signed).unwrap();
        let res: Result<Timestamp, Error> = verify_signed(&raw, &keyring, RoleName::Timestamp, 0, Utc::now());
        assert!(matches!(res, Err(Error::VerifyExpired(_))));
    }

    #[test]
    fn test_verify_signed_rejects_below_threshold() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();
        let keyring = keyring_with(&keyid, public, RoleName::Timestamp, 2);

        let signed = signed_timestamp(&private, 1, "2999-01-01T00:00:00Z");
        let raw = json::to_vec(&signed).unwrap();
        let res: Result<Timestamp, Error> = verify_signed(&raw, &keyring, RoleName::Timestamp, 0, Utc::now());
        assert!(matches!(res, Err(Error::VerifyThresholdNotMet(_))));
    }
}
