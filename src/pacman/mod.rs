//! Package manager backends: the collaborator the
//! orchestrator hands a downloaded target's path to for installation, and
//! asks for the currently installed content hash.

pub mod deb;
pub mod interface;
pub mod ostree;
pub mod rpm;
pub mod test;

pub use self::interface::{Backend, PackageManager};
pub use self::test::{assert_rx, TestDir, TestManager};
