use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde::ser::{Serialize, Serializer};
use serde_json as json;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::canonical::canonicalize;
use datatype::crypto;
use datatype::Error;


/// The two signature algorithms this client understands.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum KeyType {
    Ed25519,
    Rsa,
}

impl KeyType {
    fn as_str(&self) -> &'static str {
        match *self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa     => "rsa",
        }
    }
}

impl Default for KeyType {
    fn default() -> KeyType { KeyType::Ed25519 }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyType::Ed25519),
            "rsa"     => Ok(KeyType::Rsa),
            _ => Err(Error::CryptoUnsupportedAlgorithm(s.into())),
        }
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(|err: Error| SerdeError::custom(err.to_string()))
    }
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.as_str())
    }
}


/// The encoded public half of a key: for RSA this is a PEM-encoded
/// SubjectPublicKeyInfo, for Ed25519 a hex-encoded 32-byte point.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct KeyValue {
    pub public: String,
}

/// A tagged public key as it appears in a root document's `keys` map
///.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct PublicKey {
    pub keytype: KeyType,
    pub keyval: KeyValue,
}

impl PublicKey {
    /// The canonical key-id: hex SHA-256 of the canonical JSON encoding of
    /// `{keytype, keyval: {public}}`.
    pub fn key_id(&self) -> Result<String, Error> {
        let cjson = canonicalize(&json::json!({
            "keytype": self.keytype,
            "keyval": { "public": self.keyval.public },
        }))?;
        Ok(hex::encode(crypto::sha256(&cjson)))
    }

    /// Equality per spec 3: same algorithm and value; for RSA also the
    /// same modulus length, so two PEM encodings of different-strength
    /// keys never collide even if a prefix happens to match.
    pub fn equivalent(&self, other: &PublicKey) -> bool {
        if self.keytype != other.keytype || self.keyval.public != other.keyval.public {
            return false;
        }
        if self.keytype == KeyType::Rsa {
            return self.modulus_len().ok() == other.modulus_len().ok();
        }
        true
    }

    fn modulus_len(&self) -> Result<usize, Error> {
        let der = pem::parse(&self.keyval.public)?;
        Ok(der.contents.len())
    }

    /// Decode `keyval.public` into the raw bytes `crypto::verify` expects:
    /// a hex-encoded point for Ed25519, a PEM-wrapped SubjectPublicKeyInfo
    /// for RSA.
    pub fn der_bytes(&self) -> Result<Vec<u8>, Error> {
        match self.keytype {
            KeyType::Ed25519 => Ok(hex::decode(&self.keyval.public)?),
            KeyType::Rsa     => Ok(pem::parse(&self.keyval.public)?.contents),
        }
    }
}

/// A private signing key held by the primary (or, in the multicast
/// reference secondary, by that secondary). `keyid` is cached at load time
/// so every signature carries the id without recomputing it.
#[derive(Clone)]
pub struct PrivateKey {
    pub keyid: String,
    pub keytype: KeyType,
    pub der_key: Vec<u8>,
}

impl PrivateKey {
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        crypto::sign(self.keytype, &self.der_key, msg)
    }
}
