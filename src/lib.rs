extern crate base64;
extern crate chrono;
extern crate crossbeam_channel;
extern crate hex;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate maplit;
extern crate native_tls;
extern crate olpc_cjson;
extern crate openssl;
extern crate pem;
extern crate rand;
extern crate ring;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate socket2;
extern crate toml;
extern crate ureq;
extern crate url;
extern crate uuid;

pub mod atomic;
pub mod broadcast;
pub mod datatype;
pub mod fetcher;
pub mod http;
pub mod orchestrator;
pub mod pacman;
pub mod secondary;
pub mod store;
pub mod uptane;
