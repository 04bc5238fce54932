use native_tls::{Certificate, Identity, TlsConnector as NativeTlsConnector};
use std::fs;
use std::sync::{Arc, Mutex};

use datatype::Error;


lazy_static! {
    static ref CONNECTOR: Mutex<Option<Arc<NativeTlsConnector>>> = Mutex::new(None);
}

/// Certificate material for the device's own TLS trust: a CA bundle to
/// validate the server, and optionally a client identity (PKCS#12) for
/// mutual TLS with the provisioning/director servers.
#[derive(Default)]
pub struct TlsData<'p> {
    pub ca_path: Option<&'p str>,
    pub p12_path: Option<&'p str>,
    pub p12_pass: Option<&'p str>,
}

/// Build and install the process-wide TLS connector. Must be called once
/// before any `AuthClient` is constructed.
pub fn init_tls_client(tls: Option<TlsData>) -> Result<(), Error> {
    let mut builder = NativeTlsConnector::builder();

    if let Some(ref tls) = tls {
        if let Some(path) = tls.ca_path {
            debug!("adding CA certificate bundle from {}", path);
            let pem = fs::read(path)?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|err| Error::Config(format!("bad CA certificate: {}", err)))?;
            builder.add_root_certificate(cert);
        }

        if let Some(path) = tls.p12_path {
            debug!("adding client identity from {}", path);
            let der = fs::read(path)?;
            let pass = tls.p12_pass.unwrap_or("");
            let identity = Identity::from_pkcs12(&der, pass)
                .map_err(|err| Error::Config(format!("bad PKCS#12 identity: {}", err)))?;
            builder.identity(identity);
        }
    } else {
        debug!("using the platform's default TLS trust store");
    }

    let connector = builder
        .build()
        .map_err(|err| Error::Config(format!("couldn't build TLS connector: {}", err)))?;
    *CONNECTOR.lock()? = Some(Arc::new(connector));
    Ok(())
}

/// Install the default (no client cert, platform trust store) connector.
/// Used by tests and by any transport that isn't provisioned yet.
pub fn use_default_certificates() {
    init_tls_client(None).expect("default TLS connector");
}

pub(super) fn connector() -> Arc<NativeTlsConnector> {
    let existing = CONNECTOR.lock().expect("TLS connector mutex poisoned").clone();
    existing.unwrap_or_else(|| {
        use_default_certificates();
        CONNECTOR.lock().expect("TLS connector mutex poisoned").clone().expect("connector installed")
    })
}
