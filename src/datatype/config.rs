use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::Deref;

use datatype::auth::{Auth, ClientCredentials};
use datatype::key::KeyType;
use datatype::network::Url;
use datatype::Error;
use http::TlsData;
use pacman::Backend;


/// The full set of configuration sections, each independently optional or
/// defaulted: every section type is itself `Deserialize` with
/// `#[serde(default)]` fields, so a missing `[section]` or a missing key
/// inside one just falls back to `Default::default()`.
#[derive(Deserialize, Default, PartialEq, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub provision: Option<ProvisionConfig>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub uptane: UptaneConfig,
}

impl Config {
    /// Read a toml config file, falling back to defaults for missing
    /// sections or fields.
    pub fn load(path: &str) -> Result<Config, Error> {
        info!("Loading config file: {}", path);
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("couldn't open config: {}", err)))?;
        Config::parse(&text)
    }

    pub fn parse(toml: &str) -> Result<Config, Error> {
        Ok(toml::from_str(toml)?)
    }

    /// Return the initial `Auth` type to bootstrap the transport with.
    pub fn initial_auth(&self) -> Result<Auth, Error> {
        match (self.auth.as_ref(), self.tls.as_ref(), self.provision.as_ref()) {
            (Some(_), Some(_), _)       => Err(Error::Config("need one of [auth] or [tls] section only".into())),
            (Some(_), _,       Some(_)) => Err(Error::Config("need one of [auth] or [provision] section only".into())),
            (None,    None,    None)    => Ok(Auth::None),
            (None,    Some(_), None)    => Ok(Auth::Certificate),
            (None,    _,       Some(_)) => Ok(Auth::Provision),
            (Some(auth), _, _) => Ok(Auth::Credentials(ClientCredentials {
                client_id:     auth.client_id.clone(),
                client_secret: auth.client_secret.clone(),
            })),
        }
    }

    /// Return the certificates used for TLS connections.
    pub fn tls_data(&self) -> TlsData {
        if let Some(ref tls) = self.tls {
            TlsData {
                ca_path:  Some(&tls.ca_file),
                p12_path: Some(&tls.p12_path),
                p12_pass: Some(&tls.p12_password),
            }
        } else {
            TlsData {
                ca_path:  self.core.ca_file.as_ref().map(Deref::deref),
                p12_path: None,
                p12_pass: None,
            }
        }
    }
}


/// The `[auth]` section: OAuth2 client-credentials bootstrap for the
/// director/repo HTTP transport.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_server")]
    pub server: Url,
    #[serde(default = "AuthConfig::default_client_id")]
    pub client_id: String,
    #[serde(default = "AuthConfig::default_client_secret")]
    pub client_secret: String,
}

impl AuthConfig {
    fn default_server() -> Url { "http://127.0.0.1:9001".parse().expect("default auth server") }
    fn default_client_id() -> String { "client-id".into() }
    fn default_client_secret() -> String { "client-secret".into() }
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            server:        Self::default_server(),
            client_id:     Self::default_client_id(),
            client_secret: Self::default_client_secret(),
        }
    }
}


/// The `[core]` section: device-wide polling cadence and trust anchor.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct CoreConfig {
    #[serde(default = "CoreConfig::default_polling")]
    pub polling: bool,
    #[serde(default = "CoreConfig::default_polling_sec")]
    pub polling_sec: u64,
    #[serde(default)]
    pub ca_file: Option<String>,
}

impl CoreConfig {
    fn default_polling() -> bool { true }
    fn default_polling_sec() -> u64 { 10 }
}

impl Default for CoreConfig {
    fn default() -> CoreConfig {
        CoreConfig {
            polling:     Self::default_polling(),
            polling_sec: Self::default_polling_sec(),
            ca_file:     None,
        }
    }
}


/// The `[device]` section: local identity and package manager backend.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct DeviceConfig {
    #[serde(default = "DeviceConfig::default_uuid")]
    pub uuid: String,
    #[serde(default = "DeviceConfig::default_packages_dir")]
    pub packages_dir: String,
    #[serde(default)]
    pub package_manager: Backend,
    #[serde(default = "DeviceConfig::default_auto_download")]
    pub auto_download: bool,
}

impl DeviceConfig {
    fn default_uuid() -> String { "123e4567-e89b-12d3-a456-426655440000".into() }
    fn default_packages_dir() -> String { "/var/sota/packages/".into() }
    fn default_auto_download() -> bool { true }
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            uuid:            Self::default_uuid(),
            packages_dir:    Self::default_packages_dir(),
            package_manager: Backend::Off,
            auto_download:   Self::default_auto_download(),
        }
    }
}


/// The `[network]` section: fetcher timeouts, retry/backoff and
/// concurrency knobs.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct NetworkConfig {
    #[serde(default = "NetworkConfig::default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
    #[serde(default = "NetworkConfig::default_total_timeout_sec")]
    pub total_timeout_sec: u64,
    #[serde(default = "NetworkConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "NetworkConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "NetworkConfig::default_max_role_size_timestamp")]
    pub max_role_size_timestamp: u64,
    #[serde(default = "NetworkConfig::default_max_role_size_other")]
    pub max_role_size_other: u64,
    #[serde(default = "NetworkConfig::default_parallel_downloads")]
    pub parallel_downloads: usize,
    #[serde(default = "NetworkConfig::default_progress_chunk_bytes")]
    pub progress_chunk_bytes: u64,
}

impl NetworkConfig {
    fn default_connect_timeout_sec() -> u64 { 20 }
    fn default_total_timeout_sec() -> u64 { 300 }
    fn default_max_retries() -> u32 { 5 }
    fn default_backoff_base_ms() -> u64 { 500 }
    fn default_max_role_size_timestamp() -> u64 { 64 * 1024 }
    fn default_max_role_size_other() -> u64 { 500 * 1024 }
    fn default_parallel_downloads() -> usize { 1 }
    fn default_progress_chunk_bytes() -> u64 { 64 * 1024 }
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            connect_timeout_sec:     Self::default_connect_timeout_sec(),
            total_timeout_sec:       Self::default_total_timeout_sec(),
            max_retries:             Self::default_max_retries(),
            backoff_base_ms:         Self::default_backoff_base_ms(),
            max_role_size_timestamp: Self::default_max_role_size_timestamp(),
            max_role_size_other:     Self::default_max_role_size_other(),
            parallel_downloads:      Self::default_parallel_downloads(),
            progress_chunk_bytes:    Self::default_progress_chunk_bytes(),
        }
    }
}


/// The `[provision]` section: bootstrap a device identity from a PKCS#12
/// bundle.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct ProvisionConfig {
    #[serde(default = "ProvisionConfig::default_p12_path")]
    pub p12_path: String,
    #[serde(default)]
    pub p12_password: String,
    #[serde(default = "ProvisionConfig::default_expiry_days")]
    pub expiry_days: u32,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl ProvisionConfig {
    fn default_p12_path() -> String { "/var/sota/registration.p12".into() }
    fn default_expiry_days() -> u32 { 365 }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            p12_path:     Self::default_p12_path(),
            p12_password: String::new(),
            expiry_days:  Self::default_expiry_days(),
            device_id:    None,
        }
    }
}


/// The `[tls]` section: mutual-TLS transport credentials, mutually
/// exclusive with `[auth]`.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TlsConfig {
    pub server: Url,
    #[serde(default = "TlsConfig::default_p12_path")]
    pub p12_path: String,
    #[serde(default)]
    pub p12_password: String,
    #[serde(default = "TlsConfig::default_ca_file")]
    pub ca_file: String,
}

impl TlsConfig {
    fn default_p12_path() -> String { "/var/sota/device.p12".into() }
    fn default_ca_file() -> String { "/var/sota/ca.crt".into() }
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            server:       "https://127.0.0.1:8443".parse().expect("default tls server"),
            p12_path:     Self::default_p12_path(),
            p12_password: String::new(),
            ca_file:      Self::default_ca_file(),
        }
    }
}


/// The `[uptane]` section: the two repository endpoints and the primary
/// ECU's own identity and signing key.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct UptaneConfig {
    #[serde(default = "UptaneConfig::default_director_server")]
    pub director_server: Url,
    #[serde(default = "UptaneConfig::default_repo_server")]
    pub repo_server: Url,
    #[serde(default = "UptaneConfig::default_primary_ecu_serial")]
    pub primary_ecu_serial: String,
    #[serde(default = "UptaneConfig::default_primary_hardware_id")]
    pub primary_hardware_id: String,
    #[serde(default = "UptaneConfig::default_metadata_path")]
    pub metadata_path: String,
    #[serde(default = "UptaneConfig::default_private_key_path")]
    pub private_key_path: String,
    #[serde(default = "UptaneConfig::default_public_key_path")]
    pub public_key_path: String,
    #[serde(default)]
    pub primary_key_type: KeyType,
}

impl UptaneConfig {
    fn default_director_server() -> Url { "http://localhost:8001".parse().expect("default director server") }
    fn default_repo_server() -> Url { "http://localhost:8002".parse().expect("default repo server") }
    fn default_primary_ecu_serial() -> String { "primary-serial".into() }
    fn default_primary_hardware_id() -> String { "primary-hw-id".into() }
    fn default_metadata_path() -> String { "/var/sota/metadata".into() }
    fn default_private_key_path() -> String { "/var/sota/ecuprimary.der".into() }
    fn default_public_key_path() -> String { "/var/sota/ecuprimary.pub".into() }
}

impl Default for UptaneConfig {
    fn default() -> UptaneConfig {
        UptaneConfig {
            director_server:     Self::default_director_server(),
            repo_server:         Self::default_repo_server(),
            primary_ecu_serial:  Self::default_primary_ecu_serial(),
            primary_hardware_id: Self::default_primary_hardware_id(),
            metadata_path:       Self::default_metadata_path(),
            private_key_path:    Self::default_private_key_path(),
            public_key_path:     Self::default_public_key_path(),
            primary_key_type:    KeyType::Ed25519,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let cfg = Config::parse("").expect("parse");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.core.polling_sec, 10);
        assert_eq!(cfg.network.parallel_downloads, 1);
    }

    #[test]
    fn test_parse_overrides_single_field() {
        let cfg = Config::parse("[core]\npolling_sec = 42\n").expect("parse");
        assert_eq!(cfg.core.polling_sec, 42);
        assert!(cfg.core.polling); // untouched fields still default
    }

    #[test]
    fn test_auth_and_tls_mutually_exclusive() {
        let cfg = Config::parse("[auth]\nclient_id = \"a\"\nclient_secret = \"b\"\n\n[tls]\nserver = \"https://x\"\n")
            .expect("parse");
        assert!(cfg.initial_auth().is_err());
    }

    #[test]
    fn test_uptane_section_defaults() {
        let cfg = Config::parse("").expect("parse");
        assert_eq!(cfg.uptane.primary_ecu_serial, "primary-serial");
        assert_eq!(cfg.uptane.primary_key_type, KeyType::Ed25519);
    }
}
