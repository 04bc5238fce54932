extern crate chrono;
extern crate crossbeam_channel;
extern crate ctrlc;
extern crate env_logger;
extern crate getopts;
#[macro_use]
extern crate log;
extern crate serde_json;
extern crate sota;

use getopts::Options;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{env, process, thread};

use sota::broadcast::Broadcast;
use sota::datatype::{Config, Error, Event, PrivateKey, PublicKey, Util};
use sota::http::{init_tls_client, AuthClient};
use sota::orchestrator::Orchestrator;
use sota::store::FileMetadataStore;


macro_rules! exit {
    ($code:expr, $fmt:expr, $($arg:tt)*) => {{
        println!($fmt, $($arg)*);
        process::exit($code);
    }}
}


fn main() {
    start_logging();
    let config = build_config();
    init_tls_client(Some(config.tls_data())).unwrap_or_else(|err| exit!(2, "{}", err));
    let auth = config.initial_auth().unwrap_or_else(|err| exit!(2, "{}", err));
    let primary_key = load_primary_key(&config).unwrap_or_else(|err| exit!(2, "couldn't load primary key: {}", err));

    let transport = Box::new(AuthClient::new(auth));
    let store = Box::new(FileMetadataStore::new(format!("{}/store", config.uptane.metadata_path)));
    let pacman = config.device.package_manager.build();
    let device_state_path = format!("{}/device_state.json", config.uptane.metadata_path);

    let (etx, erx) = crossbeam_channel::unbounded::<Event>();
    let mut broadcast = Broadcast::new(erx);
    let console_erx = broadcast.subscribe();
    thread::spawn(move || {
        for event in console_erx.iter() {
            info!("{:?}", event);
        }
    });
    thread::spawn(move || broadcast.start());

    let mut orchestrator = Orchestrator::new(
        config.network.clone(),
        config.uptane.clone(),
        transport,
        store,
        pacman,
        primary_key,
        etx,
        device_state_path,
    ).unwrap_or_else(|err| exit!(2, "couldn't start orchestrator: {}", err));

    let cancelled = Arc::new(AtomicBool::new(false));
    let handler_flag = cancelled.clone();
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)).expect("couldn't install signal handler");

    if !config.core.polling {
        let result = orchestrator.run_cycle(chrono::Utc::now(), &|| cancelled.load(Ordering::SeqCst));
        info!("update check finished: {:?}", result);
        return;
    }

    info!("polling for updates every {} seconds", config.core.polling_sec);
    while !cancelled.load(Ordering::SeqCst) {
        let result = orchestrator.run_cycle(chrono::Utc::now(), &|| cancelled.load(Ordering::SeqCst));
        info!("update cycle finished: {:?}", result);
        sleep_interruptibly(Duration::from_secs(config.core.polling_sec), &cancelled);
    }
}

fn sleep_interruptibly(total: Duration, cancelled: &AtomicBool) {
    let step = Duration::from_millis(200);
    let mut waited = Duration::from_secs(0);
    while waited < total && !cancelled.load(Ordering::SeqCst) {
        thread::sleep(step);
        waited += step;
    }
}

fn start_logging() {
    let mut builder = env_logger::Builder::new();
    builder.format(|buf, record| {
        writeln!(buf, "{} ({}): {} - {}", chrono::Utc::now().to_rfc3339(), record.level(), record.target(), record.args())
    });
    builder.parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    builder.init();
}

/// Loads the primary ECU's signing key pair from the paths configured in
/// `uptane.private_key_path` / `uptane.public_key_path`. The private key
/// file holds raw key material; the public key file holds a JSON-encoded
/// `PublicKey`, from which the keyid is derived.
fn load_primary_key(config: &Config) -> Result<PrivateKey, Error> {
    let der_key = Util::read_file(&config.uptane.private_key_path)?;
    let public_bytes = Util::read_file(&config.uptane.public_key_path)?;
    let public: PublicKey = serde_json::from_slice(&public_bytes)
        .map_err(|err| Error::Config(format!("malformed public key at {}: {}", config.uptane.public_key_path, err)))?;
    let keyid = public.key_id()?;
    Ok(PrivateKey { keyid, keytype: config.uptane.primary_key_type, der_key })
}

fn build_config() -> Config {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();
    let mut opts = Options::new();

    opts.optflag("h", "help", "print this help menu then quit");
    opts.optflag("p", "print", "print the parsed config then quit");
    opts.optopt("c", "config", "change config path", "PATH");

    opts.optopt("", "core-polling", "toggle polling for updates", "BOOL");
    opts.optopt("", "core-polling-sec", "change the core polling interval", "SECONDS");
    opts.optopt("", "core-ca-file", "pin the core CA certificates path", "PATH");

    opts.optopt("", "device-uuid", "change the device uuid", "UUID");
    opts.optopt("", "device-packages-dir", "change the downloaded packages directory", "PATH");
    opts.optopt("", "device-package-manager", "change the package manager backend", "BACKEND");
    opts.optopt("", "device-auto-download", "toggle downloading targets as soon as they're found", "BOOL");

    opts.optopt("", "auth-server", "change the auth server", "URL");
    opts.optopt("", "auth-client-id", "change the auth client id", "ID");
    opts.optopt("", "auth-client-secret", "change the auth client secret", "SECRET");

    opts.optopt("", "tls-server", "change the TLS server", "URL");
    opts.optopt("", "tls-ca-file", "pin the TLS root CA certificate chain", "PATH");

    opts.optopt("", "uptane-director-server", "change the Uptane director server", "URL");
    opts.optopt("", "uptane-repo-server", "change the Uptane image repo server", "URL");
    opts.optopt("", "uptane-primary-ecu-serial", "change the primary ECU's serial", "TEXT");
    opts.optopt("", "uptane-primary-hardware-id", "change the primary ECU's hardware id", "TEXT");
    opts.optopt("", "uptane-metadata-path", "change the directory used to persist Uptane metadata", "PATH");
    opts.optopt("", "uptane-private-key-path", "change the path to the primary ECU's private key", "PATH");
    opts.optopt("", "uptane-public-key-path", "change the path to the primary ECU's public key", "PATH");

    let cli = opts.parse(&args[1..]).unwrap_or_else(|err| exit!(1, "{}", err));
    if cli.opt_present("help") {
        exit!(0, "{}", opts.usage(&format!("Usage: {} [options]", program)));
    }

    let file = cli.opt_str("config").or_else(|| env::var("SOTA_CONFIG").ok()).unwrap_or_else(|| exit!(1, "{}", "no config provided"));
    let mut config = Config::load(&file).unwrap_or_else(|err| exit!(1, "{}", err));

    if let Some(auth_cfg) = config.auth.as_mut() {
        if let Some(text) = cli.opt_str("auth-server") {
            auth_cfg.server = text.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --auth-server"));
        }
        if let Some(id) = cli.opt_str("auth-client-id") {
            auth_cfg.client_id = id;
        }
        if let Some(secret) = cli.opt_str("auth-client-secret") {
            auth_cfg.client_secret = secret;
        }
    }

    if let Some(polling) = cli.opt_str("core-polling") {
        config.core.polling = polling.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --core-polling"));
    }
    if let Some(secs) = cli.opt_str("core-polling-sec") {
        config.core.polling_sec = secs.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --core-polling-sec"));
    }
    if let Some(path) = cli.opt_str("core-ca-file") {
        config.core.ca_file = Some(path);
    }

    if let Some(uuid) = cli.opt_str("device-uuid") {
        config.device.uuid = uuid;
    }
    if let Some(path) = cli.opt_str("device-packages-dir") {
        config.device.packages_dir = path;
    }
    if let Some(backend) = cli.opt_str("device-package-manager") {
        config.device.package_manager = backend.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --device-package-manager"));
    }
    if let Some(auto) = cli.opt_str("device-auto-download") {
        config.device.auto_download = auto.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --device-auto-download"));
    }

    if let Some(tls_cfg) = config.tls.as_mut() {
        if let Some(text) = cli.opt_str("tls-server") {
            tls_cfg.server = text.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --tls-server"));
        }
        if let Some(path) = cli.opt_str("tls-ca-file") {
            tls_cfg.ca_file = path;
        }
    }

    if let Some(url) = cli.opt_str("uptane-director-server") {
        config.uptane.director_server = url.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --uptane-director-server"));
    }
    if let Some(url) = cli.opt_str("uptane-repo-server") {
        config.uptane.repo_server = url.parse().unwrap_or_else(|_| exit!(1, "{}", "invalid --uptane-repo-server"));
    }
    if let Some(serial) = cli.opt_str("uptane-primary-ecu-serial") {
        config.uptane.primary_ecu_serial = serial;
    }
    if let Some(hw) = cli.opt_str("uptane-primary-hardware-id") {
        config.uptane.primary_hardware_id = hw;
    }
    if let Some(path) = cli.opt_str("uptane-metadata-path") {
        config.uptane.metadata_path = path;
    }
    if let Some(path) = cli.opt_str("uptane-private-key-path") {
        config.uptane.private_key_path = path;
    }
    if let Some(path) = cli.opt_str("uptane-public-key-path") {
        config.uptane.public_key_path = path;
    }

    if cli.opt_present("print") {
        exit!(0, "{:#?}", config);
    }

    config
}
