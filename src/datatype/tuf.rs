use chrono::{DateTime, Utc};
use hex;
use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde::ser::{Serialize, Serializer};
use serde_json as json;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::canonical::canonicalize;
use datatype::key::{PrivateKey, PublicKey};
use datatype::signature::{Signature, SignatureType};
use datatype::Error;


/// The four top-level Uptane roles. Delegated
/// targets roles carry their own free-form name and aren't part of this
/// enum — see `DelegationRole`.
#[derive(Serialize, Hash, Eq, PartialEq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root"      => Ok(RoleName::Root),
            "timestamp" => Ok(RoleName::Timestamp),
            "snapshot"  => Ok(RoleName::Snapshot),
            "targets"   => Ok(RoleName::Targets),
            _ => Err(Error::VerifyUnknownRole(s.into())),
        }
    }
}

impl Display for RoleName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match *self {
            RoleName::Root      => "root",
            RoleName::Timestamp => "timestamp",
            RoleName::Snapshot  => "snapshot",
            RoleName::Targets   => "targets",
        };
        write!(f, "{}", s)
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<RoleName, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(|err: Error| SerdeError::custom(err.to_string()))
    }
}

/// Behaviour shared by every signed role body: the fields the verifier
/// checks regardless of which concrete role it's looking at.
pub trait RoleBody {
    fn role_name(&self) -> RoleName;
    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires() < now
    }
}

macro_rules! impl_role_body {
    ($ty: ident, $role: expr) => {
        impl RoleBody for $ty {
            fn role_name(&self) -> RoleName { $role }
            fn version(&self) -> u64 { self.version }
            fn expires(&self) -> DateTime<Utc> { self.expires }
        }
    };
}


/// `{threshold, keyids}` as it appears in root's `roles` map.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RoleKeys {
    pub keyids: HashSet<String>,
    pub threshold: u64,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Root {
    #[serde(rename = "_type")]
    pub _type: RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: HashMap<String, PublicKey>,
    pub roles: HashMap<RoleName, RoleKeys>,
}

impl_role_body!(Root, RoleName::Root);

impl Root {
    pub fn role_keys(&self, role: RoleName) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }
}


/// The (path, metadata) pair an ECU manifest reports as "what I have
/// installed".
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TufImage {
    pub filepath: String,
    pub fileinfo: TufMeta,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TufMeta {
    pub length: u64,
    pub hashes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Timestamp {
    #[serde(rename = "_type")]
    pub _type: RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Keyed by "snapshot.json".
    pub meta: HashMap<String, TufMeta>,
}

impl_role_body!(Timestamp, RoleName::Timestamp);

impl Timestamp {
    pub fn snapshot_meta(&self) -> Result<&TufMeta, Error> {
        self.meta.get("snapshot.json")
            .ok_or_else(|| Error::VerifyMalformedDocument("timestamp missing snapshot.json meta".into()))
    }
}


#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Snapshot {
    #[serde(rename = "_type")]
    pub _type: RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Keyed by "targets.json" (and any delegated-role filenames).
    pub meta: HashMap<String, TufMeta>,
}

impl_role_body!(Snapshot, RoleName::Snapshot);

impl Snapshot {
    pub fn targets_meta(&self) -> Result<&TufMeta, Error> {
        self.meta.get("targets.json")
            .ok_or_else(|| Error::VerifyMalformedDocument("snapshot missing targets.json meta".into()))
    }
}


/// Custom fields Uptane attaches to a target entry beyond plain TUF.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct TargetCustom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecu_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TargetInfo {
    pub length: u64,
    pub hashes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<TargetCustom>,
}

/// One child delegation declared in a targets role's `delegations` block
///.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct DelegationRole {
    pub name: String,
    pub keyids: HashSet<String>,
    pub threshold: u64,
    pub paths: Vec<String>,
    #[serde(default)]
    pub terminating: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Delegations {
    pub keys: HashMap<String, PublicKey>,
    pub roles: Vec<DelegationRole>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Targets {
    #[serde(rename = "_type")]
    pub _type: RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: HashMap<String, TargetInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl_role_body!(Targets, RoleName::Targets);


/// A role document paired with its signature set.
/// `signed` is kept as the typed role body; signature verification
/// re-serializes it through the canonicalizer rather than trusting the raw
/// bytes the document arrived in, so re-encoding never drifts from what was
/// actually verified.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Signed<T> {
    pub signatures: Vec<Signature>,
    pub signed: T,
}

impl<T: Serialize> Signed<T> {
    pub fn canonical_body(&self) -> Result<Vec<u8>, Error> {
        canonicalize(&json::to_value(&self.signed)?)
    }

    pub fn sign(signed: T, key: &PrivateKey) -> Result<Signed<T>, Error> {
        let body = canonicalize(&json::to_value(&signed)?)?;
        let sig = key.sign(&body)?;
        Ok(Signed {
            signatures: vec![Signature {
                keyid:  key.keyid.clone(),
                method: SignatureType::from(key.keytype),
                sig:    hex::encode(&sig),
            }],
            signed,
        })
    }

    /// Check this document carries a valid signature from `key`. Used where
    /// a single known key (not a role threshold) is the whole trust basis,
    /// e.g. a secondary ECU's own manifest.
    pub fn verify_with(&self, key: &PublicKey) -> Result<(), Error> {
        let body = self.canonical_body()?;
        let der_public = key.der_bytes()?;
        let keyid = key.key_id()?;

        let valid = self.signatures.iter().any(|sig| {
            sig.keyid == keyid
                && hex::decode(&sig.sig)
                    .map(|bytes| sig.method.verify_msg(&body, &der_public, &bytes))
                    .unwrap_or(false)
        });

        if valid {
            Ok(())
        } else {
            Err(Error::VerifyBadSignature(format!("no valid signature from key {}", keyid)))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{hashmap, hashset};

    #[test]
    fn test_role_name_roundtrip() {
        for role in &[RoleName::Root, RoleName::Timestamp, RoleName::Snapshot, RoleName::Targets] {
            let s = role.to_string();
            assert_eq!(&s.parse::<RoleName>().unwrap(), role);
        }
    }

    #[test]
    fn test_root_role_keys() {
        let root = Root {
            _type: RoleName::Root,
            version: 1,
            expires: Utc::now(),
            keys: hashmap!{},
            roles: hashmap!{
                RoleName::Targets => RoleKeys { keyids: hashset!{"abc".into()}, threshold: 1 },
            },
        };
        assert_eq!(root.role_keys(RoleName::Targets).unwrap().threshold, 1);
        assert!(root.role_keys(RoleName::Snapshot).is_none());
    }

    #[test]
    fn test_expired() {
        let ts = Timestamp {
            _type: RoleName::Timestamp,
            version: 1,
            expires: "2000-01-01T00:00:00Z".parse().unwrap(),
            meta: hashmap!{},
        };
        assert!(ts.expired(Utc::now()));
    }
}
