extern crate getopts;
extern crate sota;

use getopts::Options;
use std::{env, process};

use sota::datatype::{Config, RoleName};
use sota::pacman::PackageManager;
use sota::store::{DeviceState, FileMetadataStore, MetadataStore};
use sota::uptane::Repo;


macro_rules! exit {
    ($code:expr, $fmt:expr, $($arg:tt)*) => {{
        println!($fmt, $($arg)*);
        process::exit($code);
    }}
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();
    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu then quit");
    opts.optopt("c", "config", "change config path", "PATH");

    let cli = opts.parse(&args[1..]).unwrap_or_else(|err| exit!(1, "{}", err));
    if cli.opt_present("help") {
        exit!(0, "{}", opts.usage(&format!("Usage: {} [options]", program)));
    }

    let file = cli.opt_str("config").or_else(|| env::var("SOTA_CONFIG").ok()).unwrap_or_else(|| exit!(1, "{}", "no config provided"));
    let config = match Config::load(&file) {
        Ok(config) => config,
        Err(err) => exit!(1, "couldn't load config: {}", err),
    };

    println!("Metadata path:       {}", config.uptane.metadata_path);
    println!("Device uuid:         {}", config.device.uuid);
    println!("Primary ECU serial:  {}", config.uptane.primary_ecu_serial);
    println!("Primary hardware id: {}", config.uptane.primary_hardware_id);

    let store = FileMetadataStore::new(format!("{}/store", config.uptane.metadata_path));
    for repo in &[Repo::Director, Repo::Image] {
        match store.latest_version(*repo, RoleName::Root) {
            Ok(version) => println!("{} root version:   {}", repo, version),
            Err(err) => exit!(1, "{} root version:   couldn't read store: {}", repo, err),
        }
    }

    let device_state_path = format!("{}/device_state.json", config.uptane.metadata_path);
    match DeviceState::load(&device_state_path) {
        Ok(state) => {
            if state.installed.is_empty() {
                println!("No ECUs have an installed image on record.");
            } else {
                for (serial, hash) in &state.installed {
                    println!("Installed on {}: {}", serial, hash);
                }
            }
        }
        Err(err) => exit!(2, "couldn't read device state: {}", err),
    }

    let pacman = config.device.package_manager.build();
    match pacman.get_current() {
        Ok(current) => println!("Primary ECU's package manager reports: {}", current),
        Err(err) => exit!(2, "couldn't query package manager: {}", err),
    }
}
