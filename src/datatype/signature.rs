use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error as SerdeError;
use serde_json as json;
use std::str::FromStr;

use datatype::crypto;
use datatype::key::KeyType;
use datatype::Error;


/// One entry of a signed role document's `signatures` array.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Signature {
    pub keyid:  String,
    pub method: SignatureType,
    pub sig:    String,
}

/// `SignatureType` mirrors `KeyType` but is kept distinct: the wire name
/// ("rsassa-pss") differs from the key's own wire name ("rsa"), and a future
/// algorithm could use the same key type under a different signature scheme.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SignatureType {
    Ed25519,
    RsaSsaPss,
}

impl<'de> Deserialize<'de> for SignatureType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown SignatureType: {}", err)))
        } else {
            Err(SerdeError::custom("unknown SignatureType"))
        }
    }
}

impl Serialize for SignatureType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(match *self {
            SignatureType::Ed25519   => "ed25519",
            SignatureType::RsaSsaPss => "rsassa-pss",
        })
    }
}

impl FromStr for SignatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519"    => Ok(SignatureType::Ed25519),
            "rsassa-pss" => Ok(SignatureType::RsaSsaPss),
            _ => Err(Error::CryptoUnsupportedAlgorithm(s.into())),
        }
    }
}

impl From<KeyType> for SignatureType {
    fn from(kt: KeyType) -> SignatureType {
        match kt {
            KeyType::Ed25519 => SignatureType::Ed25519,
            KeyType::Rsa     => SignatureType::RsaSsaPss,
        }
    }
}

impl SignatureType {
    fn key_type(&self) -> KeyType {
        match *self {
            SignatureType::Ed25519   => KeyType::Ed25519,
            SignatureType::RsaSsaPss => KeyType::Rsa,
        }
    }

    pub fn sign_msg(&self, msg: &[u8], der_key: &[u8]) -> Result<Vec<u8>, Error> {
        crypto::sign(self.key_type(), der_key, msg)
    }

    pub fn verify_msg(&self, msg: &[u8], der_key: &[u8], sig: &[u8]) -> bool {
        crypto::verify(self.key_type(), der_key, sig, msg)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use datatype::crypto::generate_keypair;

    fn flip_bit(mut data: Vec<u8>) -> Vec<u8> { data[0] ^= 1; data }

    fn sign_and_verify(sig_type: SignatureType) {
        let (pub_key, pri_key) = generate_keypair(sig_type.key_type()).expect("generate_keypair");
        let msg = b"hello";
        let sig = sig_type.sign_msg(msg, &pri_key).expect("sign_msg");
        let bad_msg = flip_bit(msg.as_ref().into());
        let bad_sig = flip_bit(sig.clone());

        assert!(sig_type.verify_msg(msg, &pub_key, &sig));
        assert!(!sig_type.verify_msg(&bad_msg, &pub_key, &sig));
        assert!(!sig_type.verify_msg(msg, &pub_key, &bad_sig));
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        sign_and_verify(SignatureType::RsaSsaPss);
    }

    #[test]
    fn test_ed25519_sign_and_verify() {
        sign_and_verify(SignatureType::Ed25519);
    }
}
