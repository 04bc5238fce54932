use chrono::{DateTime, Utc};
use hex;
use serde_json as json;
use std::collections::HashSet;

use datatype::canonical::canonicalize;
use datatype::tuf::{RoleBody, RoleName, Root, Signed};
use datatype::Error;
use uptane::verifier::KeyRing;


/// Step the persisted root forward one version at a time until `fetch`
/// reports there is no next version, cross-signing every step against both
/// the outgoing and incoming root's key sets.
///
/// `fetch(version)` returns `Ok(Some(bytes))` for the raw signed root at that
/// version, `Ok(None)` once there is no such version, or `Err` on a
/// transport failure. Only the final root's expiry is checked; a failed
/// step leaves `current` untouched.
pub fn rotate_root<F>(current: Option<Root>, mut fetch: F, now: DateTime<Utc>) -> Result<Root, Error>
where
    F: FnMut(u64) -> Result<Option<Vec<u8>>, Error>,
{
    let mut root = match current {
        Some(root) => root,
        None => {
            let raw = fetch(1)?.ok_or_else(|| {
                Error::VerifyMalformedDocument("no root.json version 1 available".into())
            })?;
            verify_initial_root(&raw)?
        }
    };

    loop {
        let next_version = root.version + 1;
        let raw = match fetch(next_version)? {
            Some(raw) => raw,
            None => break,
        };
        root = verify_next_root(&root, &raw)?;
    }

    if root.expired(now) {
        return Err(Error::VerifyExpired(RoleName::Root.to_string()));
    }

    Ok(root)
}

/// The very first root a device ever trusts is self-signed: it is only
/// checked against its own declared key set (there is no prior root to
/// cross-sign against).
fn verify_initial_root(raw: &[u8]) -> Result<Root, Error> {
    let signed: Signed<json::Value> = json::from_slice(raw)?;
    let body = canonicalize(&signed.signed)?;
    let root: Root = json::from_value(signed.signed.clone())?;
    let keyring = KeyRing::from_root(&root);
    verify_threshold(&signed, &body, &keyring, RoleName::Root)?;
    Ok(root)
}

fn verify_next_root(prior: &Root, raw: &[u8]) -> Result<Root, Error> {
    let signed: Signed<json::Value> = json::from_slice(raw)?;
    let body = canonicalize(&signed.signed)?;
    let next: Root = json::from_value(signed.signed.clone())?;

    if next.role_name() != RoleName::Root {
        return Err(Error::VerifyMalformedDocument("expected root role".into()));
    }
    if next.version() != prior.version + 1 {
        return Err(Error::VerifyVersionRollback(format!(
            "expected root version {}, got {}",
            prior.version + 1,
            next.version()
        )));
    }

    let prior_keyring = KeyRing::from_root(prior);
    verify_threshold(&signed, &body, &prior_keyring, RoleName::Root)?;

    let next_keyring = KeyRing::from_root(&next);
    verify_threshold(&signed, &body, &next_keyring, RoleName::Root)?;

    Ok(next)
}

fn verify_threshold(
    signed: &Signed<json::Value>,
    body: &[u8],
    keyring: &KeyRing,
    role: RoleName,
) -> Result<(), Error> {
    let role_keys = keyring
        .role_keys(role)
        .ok_or_else(|| Error::VerifyUnknownRole(role.to_string()))?;

    let mut counted = HashSet::new();
    for sig in &signed.signatures {
        if counted.contains(sig.keyid.as_str()) {
            continue;
        }
        if !role_keys.keyids.contains(&sig.keyid) {
            continue;
        }
        let key = match keyring.key(&sig.keyid) {
            Some(key) => key,
            None => continue,
        };
        let der_public = key.der_bytes()?;
        let sig_bytes = hex::decode(&sig.sig)?;
        if sig.method.verify_msg(body, &der_public, &sig_bytes) {
            counted.insert(sig.keyid.as_str());
        }
    }

    if (counted.len() as u64) < role_keys.threshold {
        return Err(Error::VerifyThresholdNotMet(format!(
            "root: {} of {} required signatures valid",
            counted.len(),
            role_keys.threshold
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use datatype::key::{KeyType, KeyValue, PrivateKey, PublicKey};
    use maplit::{hashmap, hashset};
    use datatype::tuf::RoleKeys;

    fn make_ed25519_keypair() -> (PublicKey, PrivateKey) {
        let (public_der, private_der) = datatype::crypto::generate_keypair(KeyType::Ed25519).unwrap();
        let public = PublicKey {
            keytype: KeyType::Ed25519,
            keyval: KeyValue { public: hex::encode(&public_der) },
        };
        let keyid = public.key_id().unwrap();
        let private = PrivateKey { keyid, keytype: KeyType::Ed25519, der_key: private_der };
        (public, private)
    }

    fn make_root(version: u64, public: &PublicKey, keyid: &str) -> Root {
        Root {
            _type: RoleName::Root,
            version,
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
    fn test_rotate_root_accepts_cross_signed_chain() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();

        let root1 = make_root(1, &public, &keyid);
        let signed1 = Signed::sign(root1, &private).unwrap();
        let raw1 = json::to_vec(&signed1).unwrap();

        let root2 = make_root(2, &public, &keyid);
        let signed2 = Signed::sign(root2, &private).unwrap();
        let raw2 = json::to_vec(&signed2).unwrap();

        let mut calls = vec![raw1, raw2];
        let fetched = rotate_root(
            None,
            |version| {
                if (version as usize) <= calls.len() {
                    Ok(Some(calls[(version - 1) as usize].clone()))
                } else {
                    Ok(None)
                }
            },
            Utc::now(),
        ).unwrap();
        let _ = calls.pop();
        assert_eq!(fetched.version, 2);
    }

    #[test]
    fn test_rotate_root_rejects_version_skip() {
        let (public, private) = make_ed25519_keypair();
        let keyid = private.keyid.clone();

        let root1 = make_root(1, &public, &keyid);
        let signed1 = Signed::sign(root1, &private).unwrap();
        let raw1 = json::to_vec(&signed1).unwrap();

        let root3 = make_root(3, &public, &keyid);
        let signed3 = Signed::sign(root3, &private).unwrap();
        let raw3 = json::to_vec(&signed3).unwrap();

        let calls = vec![raw1, raw3];
        let res = rotate_root(
            None,
            |version| Ok(calls.get((version - 1) as usize).cloned()),
            Utc::now(),
        );
        assert!(matches!(res, Err(Error::VerifyVersionRollback(_))));
    }
}
