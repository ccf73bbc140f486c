//! Vanity keypair grinder
//!
//! Brute-force search for an address that starts or ends with a chosen
//! base58 fragment. Workers are plain OS threads since the loop is pure
//! CPU; one core is left free for the async runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::info;

use crate::error::{Error, Result};
use crate::router::keypair_to_base58;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// One fresh keypair, no vanity constraint
pub fn grind() -> (String, String) {
    let keypair = Keypair::new();
    (keypair.pubkey().to_string(), keypair_to_base58(&keypair))
}

/// Search for an address whose base58 form starts or ends with
/// `fragment`. Returns `(pubkey, secret)` or times out.
pub fn grind_custom(fragment: &str, timeout: Duration) -> Result<(String, String)> {
    if fragment.is_empty() {
        return Ok(grind());
    }
    if let Some(bad) = fragment.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(Error::InvalidFragment(format!(
            "{:?} is not a base58 symbol",
            bad
        )));
    }

    let workers = thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1);

    let stop = Arc::new(AtomicBool::new(false));
    // Capacity 1: only the first winner fits, the rest are dropped
    let (tx, rx) = mpsc::sync_channel::<(String, String)>(1);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let stop = stop.clone();
        let tx = tx.clone();
        let fragment = fragment.to_string();
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let keypair = Keypair::new();
                let pubkey = keypair.pubkey().to_string();
                if pubkey.starts_with(&fragment) || pubkey.ends_with(&fragment) {
                    let _ = tx.try_send((pubkey, keypair_to_base58(&keypair)));
                    stop.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }));
    }
    drop(tx);

    let result = rx.recv_timeout(timeout);
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }

    match result {
        Ok((pubkey, secret)) => {
            info!("Ground vanity address {} for fragment {:?}", pubkey, fragment);
            Ok((pubkey, secret))
        }
        Err(_) => Err(Error::GrindTimeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::keypair_from_base58;

    #[test]
    fn test_grind_yields_usable_keypair() {
        let (pubkey, secret) = grind();
        assert!(pubkey.len() >= 32 && pubkey.len() <= 44);

        let keypair = keypair_from_base58(&secret).unwrap();
        assert_eq!(keypair.pubkey().to_string(), pubkey);
    }

    #[test]
    fn test_empty_fragment_returns_immediately() {
        let (pubkey, _) = grind_custom("", Duration::from_secs(1)).unwrap();
        assert!(!pubkey.is_empty());
    }

    #[test]
    fn test_non_base58_fragment_fails_fast() {
        assert!(matches!(
            grind_custom("O0", Duration::from_secs(1)),
            Err(Error::InvalidFragment(_))
        ));
        assert!(matches!(
            grind_custom("l", Duration::from_secs(1)),
            Err(Error::InvalidFragment(_))
        ));
    }

    #[test]
    fn test_single_char_fragment_is_found() {
        let (pubkey, secret) = grind_custom("A", Duration::from_secs(120)).unwrap();
        assert!(pubkey.starts_with('A') || pubkey.ends_with('A'));
        assert!(keypair_from_base58(&secret).is_ok());
    }

    #[test]
    fn test_hopeless_fragment_times_out() {
        let err = grind_custom("CBCB", Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, Error::GrindTimeout(_)));
    }
}
