pub mod auth;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod ecu;
pub mod error;
pub mod event;
pub mod install;
pub mod key;
pub mod manifest;
pub mod network;
pub mod signature;
pub mod tuf;
pub mod util;

pub use self::auth::{AccessToken, Auth, ClientCredentials};
pub use self::canonical::canonicalize;
pub use self::config::{Config, CoreConfig, DeviceConfig, NetworkConfig, ProvisionConfig, TlsConfig, UptaneConfig};
pub use self::ecu::{EcuCustom, EcuSerial, EcuVersion, HardwareIdentifier};
pub use self::error::Error;
pub use self::event::{CycleResult, Event};
pub use self::install::{InstallCode, InstallOutcome};
pub use self::key::{KeyType, KeyValue, PrivateKey, PublicKey};
pub use self::manifest::{build_manifest, generate_nonce, EcuManifests};
pub use self::network::{Method, Url};
pub use self::signature::{Signature, SignatureType};
pub use self::tuf::{
    DelegationRole, Delegations, Root, RoleBody, RoleKeys, RoleName, Signed, Snapshot, Targets,
    TargetCustom, TargetInfo, Timestamp, TufImage, TufMeta,
};
pub use self::util::Util;
