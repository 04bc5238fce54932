//! Metadata and target retrieval on top of the `Transport` collaborator
//!. Role documents are fetched whole, capped at the size the
//! config allows for that role; targets are fetched to disk, resumable
//! across restarts and verified by re-hashing the written file once the
//! stream completes.

pub mod backoff;

use ring::digest::{Context, SHA256, SHA512};
use std::fs::{self, OpenOptions};
use std::io::{BufReader, Read, Write};

use datatype::tuf::{RoleName, TargetInfo};
use datatype::{Error, NetworkConfig, Url};
use http::{DownloadOutcome, Transport};


/// The outcome of a completed, verified target download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub bytes: u64,
}

/// Fetch a role document, capped at the size the config allows for that
/// role (`timestamp` gets its own, much smaller cap since it's polled far
/// more often than the other three).
pub fn fetch_role(transport: &dyn Transport, url: &Url, role: RoleName, network: &NetworkConfig) -> Result<Vec<u8>, Error> {
    let cap = match role {
        RoleName::Timestamp => network.max_role_size_timestamp,
        _ => network.max_role_size_other,
    };
    let resp = backoff::retry(network.max_retries, network.backoff_base_ms, |_| transport.get(url, Some(cap)))?;
    if !resp.is_ok() {
        return Err(Error::FetchNotFound(format!("{}: HTTP {}", url, resp.code)));
    }
    Ok(resp.body)
}

/// Fetch `target` from `url` into `dest_path`, resuming from whatever has
/// already been written there, then verify its length and every hash
/// algorithm `target` declares. `on_progress(written, total)` is invoked per
/// chunk and may return `false` to cancel the download early.
pub fn fetch_target(
    transport: &dyn Transport,
    url: &Url,
    dest_path: &str,
    target: &TargetInfo,
    network: &NetworkConfig,
    on_progress: &mut dyn FnMut(u64, u64) -> bool,
) -> Result<FetchOutcome, Error> {
    let invalid_marker = format!("{}.invalid", dest_path);
    if fs::metadata(&invalid_marker).is_ok() {
        let _ = fs::remove_file(dest_path);
        fs::remove_file(&invalid_marker)?;
    }
    if let Ok(meta) = fs::metadata(dest_path) {
        if meta.len() > target.length {
            fs::remove_file(dest_path)?;
        }
    }

    let written = backoff::retry(network.max_retries, network.backoff_base_ms, |attempt| {
        if attempt > 0 {
            debug!("retrying download of {} (attempt {})", url, attempt + 1);
        }
        download_once(transport, url, dest_path, target.length, on_progress)
    })?;

    if written != target.length {
        return Err(Error::VerifyLengthMismatch(format!(
            "{}: expected {} bytes, wrote {}",
            dest_path, target.length, written
        )));
    }
    // A hash mismatch is permanent for this call: the partial
    // file is left in place but flagged so the *next* fetch restarts from
    // scratch instead of resuming corrupt bytes.
    if let Err(err) = verify_hashes(dest_path, &target.hashes) {
        fs::File::create(&invalid_marker)?;
        return Err(err);
    }

    Ok(FetchOutcome { bytes: written })
}

fn download_once(
    transport: &dyn Transport,
    url: &Url,
    dest_path: &str,
    total_length: u64,
    on_progress: &mut dyn FnMut(u64, u64) -> bool,
) -> Result<u64, Error> {
    let offset = fs::metadata(dest_path).map(|meta| meta.len()).unwrap_or(0);
    let mut file = OpenOptions::new().create(true).append(true).open(dest_path)?;
    let mut written = offset;

    let outcome = transport.download(url, offset, &mut |chunk| {
        if file.write_all(chunk).is_err() {
            return false;
        }
        written += chunk.len() as u64;
        on_progress(written, total_length)
    })?;

    match outcome {
        DownloadOutcome::Completed(_) => Ok(written),
        DownloadOutcome::Interrupted => Err(Error::Cancelled),
    }
}

/// Re-read the written file and check every hash algorithm present in
/// `expected`. At least one
/// recognised algorithm must be present or the target metadata itself is
/// malformed.
fn verify_hashes(path: &str, expected: &std::collections::HashMap<String, String>) -> Result<(), Error> {
    let mut sha256 = Context::new(&SHA256);
    let mut sha512 = Context::new(&SHA512);
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha256.update(&buf[..n]);
        sha512.update(&buf[..n]);
    }
    let actual_256 = hex::encode(sha256.finish().as_ref());
    let actual_512 = hex::encode(sha512.finish().as_ref());

    let mut checked = false;
    if let Some(want) = expected.get("sha256") {
        checked = true;
        if want.to_lowercase() != actual_256 {
            return Err(Error::VerifyHashMismatch(format!("{}: sha256 expected {}, got {}", path, want, actual_256)));
        }
    }
    if let Some(want) = expected.get("sha512") {
        checked = true;
        if want.to_lowercase() != actual_512 {
            return Err(Error::VerifyHashMismatch(format!("{}: sha512 expected {}, got {}", path, want, actual_512)));
        }
    }
    if !checked {
        return Err(Error::VerifyMalformedDocument(format!("{}: no recognised hash algorithm in target metadata", path)));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use std::fs as stdfs;
    use tempfile::tempdir;

    use http::{Response, TestClient};

    fn target_for(data: &[u8]) -> TargetInfo {
        TargetInfo {
            length: data.len() as u64,
            hashes: hashmap! {
                "sha256".into() => hex::encode(ring::digest::digest(&SHA256, data).as_ref()),
                "sha512".into() => hex::encode(ring::digest::digest(&SHA512, data).as_ref()),
            },
            custom: None,
        }
    }

    #[test]
    fn test_fetch_target_writes_and_verifies() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("firmware.bin");
        let data = b"a sizeable chunk of firmware bytes".to_vec();
        let target = target_for(&data);
        let transport = TestClient::from(vec![Response { code: 200, body: data.clone() }]);
        let url: Url = "http://example.com/firmware.bin".parse().unwrap();
        let network = NetworkConfig::default();

        let outcome = fetch_target(&transport, &url, dest.to_str().unwrap(), &target, &network, &mut |_, _| true)
            .expect("fetch_target");
        assert_eq!(outcome.bytes, data.len() as u64);
        assert_eq!(stdfs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_fetch_target_rejects_hash_mismatch() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("firmware.bin");
        let data = b"original bytes".to_vec();
        let mut target = target_for(&data);
        target.hashes.insert("sha256".into(), "0".repeat(64));
        let transport = TestClient::from(vec![Response { code: 200, body: data }]);
        let url: Url = "http://example.com/firmware.bin".parse().unwrap();
        let network = NetworkConfig::default();

        let result = fetch_target(&transport, &url, dest.to_str().unwrap(), &target, &network, &mut |_, _| true);
        assert!(matches!(result, Err(Error::VerifyHashMismatch(_))));
        assert!(stdfs::metadata(format!("{}.invalid", dest.to_str().unwrap())).is_ok());
    }

    #[test]
    fn test_fetch_target_cancelled_by_progress_callback() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("firmware.bin");
        let data = b"0123456789".to_vec();
        let target = target_for(&data);
        let transport = TestClient::from(vec![Response { code: 200, body: data }]);
        let url: Url = "http://example.com/firmware.bin".parse().unwrap();
        let mut network = NetworkConfig::default();
        network.max_retries = 0;

        let result = fetch_target(&transport, &url, dest.to_str().unwrap(), &target, &network, &mut |_, _| false);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_fetch_role_rejects_oversized_response() {
        let mut network = NetworkConfig::default();
        network.max_role_size_other = 4;
        let transport = TestClient::from(vec![Response { code: 200, body: b"too long".to_vec() }]);
        let url: Url = "http://example.com/targets.json".parse().unwrap();

        let result = fetch_role(&transport, &url, RoleName::Targets, &network);
        assert!(matches!(result, Err(Error::FetchSizeExceeded(_))));
    }

    #[test]
    fn test_fetch_role_propagates_not_found() {
        let network = NetworkConfig::default();
        let transport = TestClient::from(vec![Response { code: 404, body: Vec::new() }]);
        let url: Url = "http://example.com/root.json".parse().unwrap();

        let result = fetch_role(&transport, &url, RoleName::Root, &network);
        assert!(matches!(result, Err(Error::FetchNotFound(_))));
    }
}
