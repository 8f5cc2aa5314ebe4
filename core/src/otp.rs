//! Time-based keyed rolling code: a 60-second windowed seed derived from a
//! shared secret, used both for the upgrade handshake and per-frame tags.
//!
//! The seed is CRC-64/ECMA over the secret concatenated with a
//! little-endian window number, refreshed every 5 seconds into an atomic
//! cache and accepted with a ±1 window tolerance to ride out clock skew.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hash::HashAlgo;

const WINDOW_SECS: i64 = 60;

/// The 5s-refreshed cache of `solve(0)`, shared process-wide.
static CACHED_SEED: AtomicU64 = AtomicU64::new(0);

fn crc64_ecma_table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        const POLY: u64 = 0xC96C5795D7870F42; // reflected ECMA-182 polynomial
        let mut table = [0u64; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u64;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

fn crc64_ecma(data: &[u8]) -> u64 {
    let table = crc64_ecma_table();
    let mut crc = 0u64;
    for &b in data {
        let idx = ((crc ^ b as u64) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[idx];
    }
    crc
}

fn unix_window(delta: i64) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64;
    now / WINDOW_SECS + delta
}

/// `S(delta)`: `CRC64_ECMA(secret || encode_le_u64(window + delta))`.
pub fn solve(secret: &[u8], delta: i64) -> u64 {
    let window = unix_window(delta);
    let mut buf = Vec::with_capacity(secret.len() + 8);
    buf.extend_from_slice(secret);
    buf.extend_from_slice(&(window as u64).to_le_bytes());
    crc64_ecma(&buf)
}

/// Refresh the cached δ=0 seed. Call once at startup and again every 5s
/// from [`refresh_task`].
pub fn refresh_cached_seed(secret: &[u8]) {
    CACHED_SEED.store(solve(secret, 0), Ordering::Relaxed);
}

fn cached_seed() -> u64 {
    CACHED_SEED.load(Ordering::Relaxed)
}

/// Background task that refreshes the cached seed every 5 seconds. Runs
/// forever; spawn it once per process.
pub async fn refresh_task(secret: Vec<u8>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        interval.tick().await;
        refresh_cached_seed(&secret);
    }
}

/// Generate a tag for `payload` using the live cached seed. Generators
/// always use δ=0.
pub fn generate(payload: &[u8], algo: HashAlgo) -> [u8; 8] {
    algo.digest(payload, cached_seed())
}

/// Verify a tag against δ ∈ {cached, 0, -1, +1}, tolerating the cached value
/// going briefly stale and a clock skew of up to one window.
pub fn verify(secret: &[u8], payload: &[u8], tag: &[u8], algo: HashAlgo) -> bool {
    if tag.len() != 8 {
        return false;
    }
    let candidates = [cached_seed(), solve(secret, 0), solve(secret, -1), solve(secret, 1)];
    candidates.iter().any(|&seed| algo.digest(payload, seed) == tag)
}

/// Validate the literal `"authenticate"` payload against a hex-encoded tag,
/// used once during the WebSocket upgrade handshake.
pub fn validate_hex(secret: &[u8], hex_tag: &str, algo: HashAlgo) -> bool {
    let Ok(tag) = hex_decode(hex_tag) else { return false };
    verify(secret, b"authenticate", &tag, algo)
}

pub fn generate_hex(algo: HashAlgo) -> String {
    hex_encode(&generate(b"authenticate", algo))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16).ok_or(())?;
        let lo = (chunk[1] as char).to_digit(16).ok_or(())?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

/// Canonicalize the raw auth key into its hex form once at startup, so the
/// secret used in seed derivation is stable regardless of whether the
/// caller passed it as raw bytes or already-hex text.
pub fn canonicalize_secret(raw: &[u8]) -> Vec<u8> {
    hex_encode(raw).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_verify_round_trips() {
        let secret = canonicalize_secret(b"test-secret");
        refresh_cached_seed(&secret);
        let tag = generate(b"hello", HashAlgo::Crc);
        assert!(verify(&secret, b"hello", &tag, HashAlgo::Crc));
    }

    #[test]
    fn tag_from_adjacent_window_verifies() {
        let secret = canonicalize_secret(b"another-secret");
        refresh_cached_seed(&secret);
        for delta in [-1i64, 0, 1] {
            let seed = solve(&secret, delta);
            let tag = HashAlgo::Mem.digest(b"payload", seed);
            assert!(verify(&secret, b"payload", &tag, HashAlgo::Mem));
        }
    }

    #[test]
    fn tag_two_windows_away_does_not_verify() {
        let secret = canonicalize_secret(b"third-secret");
        refresh_cached_seed(&secret);
        let seed = solve(&secret, 2);
        let tag = HashAlgo::Mem.digest(b"payload", seed);
        assert!(!verify(&secret, b"payload", &tag, HashAlgo::Mem));
    }

    #[test]
    fn validate_hex_round_trips() {
        let secret = canonicalize_secret(b"hex-secret");
        refresh_cached_seed(&secret);
        let hex = generate_hex(HashAlgo::Xx);
        assert!(validate_hex(&secret, &hex, HashAlgo::Xx));
        assert!(!validate_hex(&secret, "00112233445566", HashAlgo::Xx));
    }
}
