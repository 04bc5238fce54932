use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::pkcs12::Pkcs12;
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use std::os::raw::c_int;

use datatype::key::KeyType;
use datatype::Error;


// openssl's `Padding` enum has no RSA-PSS constant; this is the raw
// `RSA_PKCS1_PSS_PADDING` value from openssl/rsa.h.
const RSA_PKCS1_PSS_PADDING: c_int = 6;

/// The 2048-8192 bit PSS-SHA256/MGF1-SHA256 verification algorithm used for
/// every RSA root/targets/snapshot/timestamp signature.
const RSA_PSS: &signature::RsaParameters = &signature::RSA_PSS_2048_8192_SHA256;


pub fn sha256(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, data).as_ref().into()
}

pub fn sha512(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA512, data).as_ref().into()
}

/// Sign `msg` with `der_key` under `keytype`. For `Ed25519`, `der_key` is the
/// 64-byte seed-then-public-key pair; for `Rsa`, a DER-encoded PKCS#1/PKCS#8
/// private key.
pub fn sign(keytype: KeyType, der_key: &[u8], msg: &[u8]) -> Result<Vec<u8>, Error> {
    match keytype {
        KeyType::Ed25519 => {
            if der_key.len() != 64 {
                return Err(Error::CryptoBadKey("ed25519 key must be 64 bytes (seed || public)".into()));
            }
            let pair = Ed25519KeyPair::from_seed_and_public_key(&der_key[..32], &der_key[32..])
                .map_err(|err| Error::CryptoBadKey(err.to_string()))?;
            Ok(pair.sign(msg).as_ref().into())
        }

        KeyType::Rsa => {
            let rsa = Rsa::private_key_from_der(der_key)
                .or_else(|_| Rsa::private_key_from_pem(der_key))
                .map_err(|err| Error::CryptoBadKey(err.to_string()))?;
            let pkey = PKey::from_rsa(rsa)?;
            let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
            signer.pkey_ctx_mut().set_rsa_padding(Padding::from_raw(RSA_PKCS1_PSS_PADDING))?;
            signer.update(msg)?;
            Ok(signer.sign_to_vec()?)
        }
    }
}

/// Verify `sig` over `msg` under `der_public` (DER SubjectPublicKeyInfo for
/// RSA, raw 32-byte point for Ed25519). Never panics or propagates an error:
/// any malformed input is simply not a valid signature.
pub fn verify(keytype: KeyType, der_public: &[u8], sig: &[u8], msg: &[u8]) -> bool {
    match keytype {
        KeyType::Ed25519 => {
            signature::UnparsedPublicKey::new(&signature::ED25519, der_public)
                .verify(msg, sig)
                .is_ok()
        }

        KeyType::Rsa => {
            if let Ok(pub_key) = ring_rsa_precheck(der_public) {
                if signature::UnparsedPublicKey::new(RSA_PSS, pub_key).verify(msg, sig).is_ok() {
                    return true;
                }
            }
            verify_rsa_openssl(der_public, sig, msg).unwrap_or_else(|err| {
                trace!("RSA-PSS verification failed: {}", err);
                false
            })
        }
    }
}

// `ring`'s RSA verifier takes the DER-encoded public key as-is; this just
// gives the caller a typed error instead of a bare `Result<(), Unspecified>`
// before falling through to the openssl path (e.g. for PKCS#1-wrapped keys
// ring doesn't accept directly).
fn ring_rsa_precheck(der_public: &[u8]) -> Result<&[u8], Error> {
    if der_public.is_empty() {
        return Err(Error::CryptoBadKey("empty RSA public key".into()));
    }
    Ok(der_public)
}

fn verify_rsa_openssl(der_public: &[u8], sig: &[u8], msg: &[u8]) -> Result<bool, Error> {
    let rsa = Rsa::public_key_from_der(der_public)
        .or_else(|_| Rsa::public_key_from_der_pkcs1(der_public))?;
    let pkey = PKey::from_rsa(rsa)?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), &pkey)?;
    verifier.pkey_ctx_mut().set_rsa_padding(Padding::from_raw(RSA_PKCS1_PSS_PADDING))?;
    verifier.update(msg)?;
    Ok(verifier.verify(sig)?)
}

/// Generate a new keypair, returning `(public_key_bytes, private_key_bytes)`
/// in the same encodings `sign`/`verify` expect.
pub fn generate_keypair(keytype: KeyType) -> Result<(Vec<u8>, Vec<u8>), Error> {
    match keytype {
        KeyType::Ed25519 => {
            let rng = SystemRandom::new();
            let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
                .map_err(|err| Error::CryptoBadKey(err.to_string()))?;
            let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                .map_err(|err| Error::CryptoBadKey(err.to_string()))?;
            let public: Vec<u8> = pair.public_key().as_ref().into();
            // ring doesn't expose the raw seed from a pkcs8 document, so pull
            // it back out of the DER ourselves: the last 32 bytes before the
            // public key's OCTET STRING wrapper are the seed in the standard
            // Ed25519 PKCS#8 encoding ring produces.
            let doc = pkcs8.as_ref();
            let seed_start = doc.len() - 32 - 2 - 32 - 5;
            let seed = doc[seed_start..seed_start + 32].to_vec();
            let mut private = seed;
            private.extend_from_slice(&public);
            Ok((public, private))
        }

        KeyType::Rsa => {
            let rsa = Rsa::generate(2048)?;
            let public = rsa.public_key_to_der()?;
            let private = rsa.private_key_to_der()?;
            Ok((public, private))
        }
    }
}

/// Parse a PKCS#12 bundle (device provisioning credential) into its client
/// private key, client certificate, and CA chain.
pub fn parse_pkcs12(der: &[u8], password: &str) -> Result<(PKey<Private>, X509, Vec<X509>), Error> {
    let p12 = Pkcs12::from_der(der)?;
    let parsed = p12.parse2(password)?;
    let pkey = parsed.pkey.ok_or_else(|| Error::CryptoBadKey("pkcs12 bundle missing private key".into()))?;
    let cert = parsed.cert.ok_or_else(|| Error::CryptoBadKey("pkcs12 bundle missing client certificate".into()))?;
    let chain = parsed.ca.map(|stack| stack.into_iter().collect()).unwrap_or_default();
    Ok((pkey, cert, chain))
}
