use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use datatype::Error;

/// Small collection of filesystem helpers shared by the metadata store,
/// config loader and package manager backends.
pub struct Util;

impl Util {
    pub fn read_file(path: &str) -> Result<Vec<u8>, Error> {
        let mut file = BufReader::new(File::open(path)
            .map_err(|err| Error::Client(format!("couldn't open {}: {}", path, err)))?);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|err| Error::Client(format!("couldn't read {}: {}", path, err)))?;
        Ok(buf)
    }

    pub fn write_file(path: &str, buf: &[u8]) -> Result<(), Error> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|err| Error::Client(format!("couldn't open {} for writing: {}", path, err)))?;
        let _ = file.write(buf)
            .map_err(|err| Error::Client(format!("couldn't write to {}: {}", path, err)))?;
        file.flush()?;
        Ok(())
    }

    /// Write `buf` to a sibling temp file then rename over `path`, so a
    /// reader never observes a half-written file.
    pub fn write_file_atomic(path: &str, buf: &[u8]) -> Result<(), Error> {
        let tmp = format!("{}.tmp", path);
        Util::write_file(&tmp, buf)?;
        fs::rename(&tmp, path)
            .map_err(|err| Error::Client(format!("couldn't commit {}: {}", path, err)))?;
        Ok(())
    }

    pub fn file_exists(path: &str) -> bool {
        Path::new(path).is_file()
    }
}
