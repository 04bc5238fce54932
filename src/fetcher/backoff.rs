use rand::Rng;
use std::thread;
use std::time::Duration;

use datatype::Error;


/// Classify an `Error` returned from a transport call as worth a retry or
/// not. Bad signatures, hash mismatches and not-found responses are
/// permanent; anything that could plausibly be a transient network blip is
/// retried.
fn is_transient(err: &Error) -> bool {
    match *err {
        Error::FetchTransport(_) | Error::FetchTimeout(_) | Error::FetchInterrupted => true,
        _ => false,
    }
}

/// Run `attempt` up to `max_retries` additional times (so `max_retries + 1`
/// tries total), sleeping an exponentially growing, jittered delay between
/// each failure. Gives up immediately on a non-transient error.
pub fn retry<T, F>(max_retries: u32, base_ms: u64, mut attempt: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Result<T, Error>,
{
    let mut tries = 0;
    loop {
        match attempt(tries) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if tries >= max_retries || !is_transient(&err) {
                    return Err(err);
                }
                let delay = backoff_delay(base_ms, tries);
                debug!("transient fetch error ({}), retrying in {:?}", err, delay);
                thread::sleep(delay);
                tries += 1;
            }
        }
    }
}

/// `base_ms * 2^tries`, jittered by up to 50% to avoid a thundering herd of
/// devices retrying in lockstep, capped at 60 seconds.
fn backoff_delay(base_ms: u64, tries: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << tries.min(16));
    let capped = exp.min(60_000);
    let jitter = capped / 2 + (capped / 2).saturating_mul(random_jitter()) / 100;
    Duration::from_millis(jitter.max(1))
}

/// A fresh jitter draw in [0, 100), independent across devices and across
/// calls on the same device.
fn random_jitter() -> u64 {
    rand::thread_rng().gen_range(0..100)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry(3, 1, |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::FetchTransport("connection reset".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_on_permanent_error() {
        let calls = Cell::new(0);
        let result = retry(5, 1, |_| {
            calls.set(calls.get() + 1);
            Err(Error::FetchNotFound("missing".into()))
        });
        assert!(matches!(result, Err(Error::FetchNotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_exhausts_max_retries() {
        let calls = Cell::new(0);
        let result = retry(2, 1, |_| {
            calls.set(calls.get() + 1);
            Err(Error::FetchTimeout("slow".into()))
        });
        assert!(matches!(result, Err(Error::FetchTimeout(_))));
        assert_eq!(calls.get(), 3);
    }
}
