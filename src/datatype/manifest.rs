use uuid::Uuid;

use datatype::ecu::{EcuSerial, EcuVersion};
use datatype::key::PrivateKey;
use datatype::tuf::Signed;
use datatype::Error;


/// The aggregate device manifest submitted at the end of a cycle: the primary's own serial plus one signed `EcuVersion`
/// per ECU that took part, each already signed by that ECU's own key.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuManifests {
    pub primary_ecu_serial: EcuSerial,
    pub ecu_version_manifests: Vec<Signed<EcuVersion>>,
}

/// A fresh anti-replay nonce for one `EcuVersion` entry.
pub fn generate_nonce() -> String {
    Uuid::new_v4().to_string()
}

/// Assemble and sign the aggregate manifest with the primary's key. Each
/// `EcuVersion` in `versions` is expected to already be packaged into its
/// own `Signed<EcuVersion>` (secondaries sign their own entries; the
/// primary signs its own the same way before calling this).
pub fn build_manifest(
    primary_serial: EcuSerial,
    versions: Vec<Signed<EcuVersion>>,
    primary_key: &PrivateKey,
) -> Result<Signed<EcuManifests>, Error> {
    let manifests = EcuManifests { primary_ecu_serial: primary_serial, ecu_version_manifests: versions };
    Signed::sign(manifests, primary_key)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_unique() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }
}
