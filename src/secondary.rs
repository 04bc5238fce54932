//! The primary's view of a secondary ECU: a narrow collaborator
//! the orchestrator pushes validated metadata and targets to, then asks to
//! install and report back. The secondary is treated as adversarial — every
//! manifest it returns is verified by its own key before the orchestrator
//! trusts it.

use serde_json as json;
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use atomic::{Bus, Primary, State};
use datatype::tuf::Signed;
use datatype::{EcuSerial, EcuVersion, Error, HardwareIdentifier, InstallCode, InstallOutcome, PublicKey, TargetInfo};


/// The signed role documents a secondary needs to verify an update for
/// itself, one repository's worth.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RepoBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Vec<u8>>,
    pub timestamp: Vec<u8>,
    pub snapshot: Vec<u8>,
    pub targets: Vec<u8>,
}

/// Both repositories' metadata, pushed to a secondary so it can re-derive
/// and re-verify its own install plan rather than trusting the primary's
/// word for it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MetadataBundle {
    pub director: RepoBundle,
    pub image: RepoBundle,
}

/// The abstract collaborator representing one secondary ECU.
pub trait SecondaryEcu: Send {
    fn get_serial(&self) -> EcuSerial;
    fn get_hw_id(&self) -> HardwareIdentifier;
    fn get_public_key(&self) -> PublicKey;
    fn put_metadata(&mut self, bundle: &MetadataBundle) -> Result<(), Error>;
    fn put_target(&mut self, target: &TargetInfo, reader: &mut dyn Read) -> Result<(), Error>;
    fn install(&mut self, target: &TargetInfo) -> Result<InstallOutcome, Error>;
    fn get_manifest(&mut self) -> Result<Signed<EcuVersion>, Error>;
}

#[derive(Serialize, Deserialize)]
struct TargetPayload {
    target: TargetInfo,
    blob: Vec<u8>,
}

/// The reference `SecondaryEcu`: a UDP-multicast three-phase commit that
/// steps the remote secondary through `Ready -> Verify -> Prepare ->
/// Commit|Abort`, producing the manifest the secondary signed with its own
/// key at the final step.
pub struct MulticastSecondary {
    serial: EcuSerial,
    hardware_id: HardwareIdentifier,
    public_key: PublicKey,
    primary: Primary,
}

impl MulticastSecondary {
    pub fn new(
        serial: EcuSerial,
        hardware_id: HardwareIdentifier,
        public_key: PublicKey,
        bus: Box<dyn Bus>,
        timeout: Duration,
    ) -> Self {
        let mut payloads = HashMap::new();
        payloads.insert(serial.to_string(), HashMap::new());
        let primary = Primary::new(payloads, bus, None, timeout, None);
        MulticastSecondary { serial, hardware_id, public_key, primary }
    }

    fn stage(&mut self, state: State, payload: Vec<u8>) -> Result<(), Error> {
        self.primary.set_payload(&self.serial, state, payload);
        self.primary.step_to(state)
    }
}

impl SecondaryEcu for MulticastSecondary {
    fn get_serial(&self) -> EcuSerial {
        self.serial.clone()
    }

    fn get_hw_id(&self) -> HardwareIdentifier {
        self.hardware_id.clone()
    }

    fn get_public_key(&self) -> PublicKey {
        self.public_key.clone()
    }

    fn put_metadata(&mut self, bundle: &MetadataBundle) -> Result<(), Error> {
        self.stage(State::Ready, Vec::new())?;
        self.stage(State::Verify, json::to_vec(bundle)?)
    }

    fn put_target(&mut self, target: &TargetInfo, reader: &mut dyn Read) -> Result<(), Error> {
        let mut blob = Vec::new();
        reader.read_to_end(&mut blob)?;
        let payload = TargetPayload { target: target.clone(), blob };
        self.stage(State::Prepare, json::to_vec(&payload)?)
    }

    fn install(&mut self, _target: &TargetInfo) -> Result<InstallOutcome, Error> {
        self.stage(State::Commit, Vec::new())?;
        if self.primary.committed().contains(&self.serial.to_string()) {
            Ok(InstallOutcome::ok(format!("{}: secondary committed", self.serial)))
        } else {
            Ok(InstallOutcome::new(InstallCode::InstallFailed, format!("{}: secondary aborted", self.serial)))
        }
    }

    fn get_manifest(&mut self) -> Result<Signed<EcuVersion>, Error> {
        let serial = self.serial.to_string();
        self.primary
            .take_signed(&serial)
            .ok_or_else(|| Error::SecondaryRejected(format!("{}: no signed manifest", self.serial)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use atomic::Message;
    use datatype::key::KeyType;
    use datatype::KeyValue;
    use uuid::Uuid;

    fn public_key() -> PublicKey {
        PublicKey { keytype: KeyType::Ed25519, keyval: KeyValue { public: "ab".repeat(32) } }
    }

    #[test]
    fn test_target_payload_roundtrips() {
        let target = TargetInfo { length: 3, hashes: Default::default(), custom: None };
        let payload = TargetPayload { target: target.clone(), blob: vec![1, 2, 3] };
        let bytes = json::to_vec(&payload).expect("serialize");
        let back: TargetPayload = json::from_slice(&bytes).expect("deserialize");
        assert_eq!(back.blob, vec![1, 2, 3]);
        assert_eq!(back.target.length, target.length);
    }

    #[test]
    fn test_get_serial_and_hw_id_match_construction() {
        let secondary = MulticastSecondary::new(
            EcuSerial("sec-1".into()),
            HardwareIdentifier("hw-1".into()),
            public_key(),
            Box::new(NullBus),
            Duration::from_secs(1),
        );
        assert_eq!(secondary.get_serial(), EcuSerial("sec-1".into()));
        assert_eq!(secondary.get_hw_id(), HardwareIdentifier("hw-1".into()));
    }

    struct NullBus;
    impl Bus for NullBus {
        fn read_wake_up(&mut self) -> Result<(String, Uuid), Error> {
            Err(Error::Cancelled)
        }
        fn read_message(&mut self) -> Result<Message, Error> {
            Err(Error::Cancelled)
        }
        fn write_wake_up(&self, _serial: String, _txid: Uuid) -> Result<(), Error> {
            Ok(())
        }
        fn write_message(&self, _msg: &Message) -> Result<(), Error> {
            Ok(())
        }
    }
}
