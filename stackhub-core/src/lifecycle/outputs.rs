//! Output reporting protocol.
//!
//! A component reports outputs by printing an `Outputs:` line followed by
//! `key = value` lines, ending at a blank line or end of output:
//!
//! ```text
//! Outputs:
//! dns.domain = example.com
//! db.password = "otp:3q2+7w=="
//! ```
//!
//! Only the last such section counts. Values prefixed `otp:` are encrypted
//! with the per-invocation seed exported as `HUB_OTP_SEED`.

use crate::error::{HubError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const MARKER: &str = "Outputs:";
const OTP_PREFIX: &str = "otp:";
pub const SEED_LEN: usize = 32;

/// Raw `key = value` pairs of the last outputs section in `stdout`.
pub fn parse(stdout: &str) -> BTreeMap<String, String> {
    let lines: Vec<&str> = stdout.lines().collect();
    let Some(start) = lines.iter().rposition(|l| l.trim() == MARKER) else {
        return BTreeMap::new();
    };

    let mut outputs = BTreeMap::new();
    for line in &lines[start + 1..] {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        outputs.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    outputs
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Fresh random seed for one invocation.
pub fn generate_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

pub fn seed_hex(seed: &[u8]) -> String {
    seed.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Keystream for `key`: SHA-256(seed || key || counter) blocks.
fn keystream(seed: &[u8], key: &str, len: usize) -> Vec<u8> {
    let mut stream = Vec::with_capacity(len + 32);
    let mut counter: u32 = 0;
    while stream.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(key.as_bytes());
        hasher.update(counter.to_be_bytes());
        stream.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    stream.truncate(len);
    stream
}

/// Encrypt `plaintext` for output `key`, as a component would.
pub fn encode(seed: &[u8], key: &str, plaintext: &str) -> String {
    let pad = keystream(seed, key, plaintext.len());
    let cipher: Vec<u8> = plaintext.bytes().zip(pad).map(|(b, k)| b ^ k).collect();
    format!("{}{}", OTP_PREFIX, STANDARD.encode(cipher))
}

/// Decrypt `value` if it carries the `otp:` prefix.
pub fn decode(seed: &[u8], key: &str, value: &str) -> Result<String> {
    let Some(encoded) = value.strip_prefix(OTP_PREFIX) else {
        return Ok(value.to_string());
    };
    let cipher = STANDARD.decode(encoded.trim()).map_err(|e| HubError::Internal(format!(
        "output '{}' is not valid base64: {}",
        key, e
    )))?;
    let pad = keystream(seed, key, cipher.len());
    let plain: Vec<u8> = cipher.iter().zip(pad).map(|(b, k)| b ^ k).collect();
    String::from_utf8(plain)
        .map_err(|_| HubError::Internal(format!("output '{}' does not decode to text", key)))
}

/// Parse `stdout` and decrypt every value.
pub fn capture(stdout: &str, seed: &[u8]) -> Result<BTreeMap<String, String>> {
    parse(stdout)
        .into_iter()
        .map(|(key, value)| decode(seed, &key, &value).map(|v| (key, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_section_wins() {
        let stdout = "\
Outputs:
stale = 1

applying...
Outputs:
dns.domain = example.com
quoted = \"a = b\"
not a pair
  spaced   =   value

trailing = ignored
";
        let outputs = parse(stdout);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs["dns.domain"], "example.com");
        assert_eq!(outputs["quoted"], "a = b");
        assert_eq!(outputs["spaced"], "value");
    }

    #[test]
    fn test_no_section() {
        assert!(parse("just logs\nmore logs\n").is_empty());
    }

    #[test]
    fn test_otp_roundtrip_and_seed_binding() {
        let seed = generate_seed();
        let long = "x".repeat(100);
        for plaintext in ["hunter2", "", long.as_str()] {
            let encoded = encode(&seed, "db.password", plaintext);
            assert!(encoded.starts_with("otp:"));
            assert_eq!(decode(&seed, "db.password", &encoded).unwrap(), plaintext);
        }

        let encoded = encode(&seed, "db.password", "hunter2");
        let other = generate_seed();
        assert_ne!(decode(&other, "db.password", &encoded).ok().as_deref(), Some("hunter2"));
        assert_eq!(seed_hex(&seed).len(), 64);
    }

    #[test]
    fn test_capture_decodes() {
        let seed = [7u8; SEED_LEN];
        let secret = encode(&seed, "secret", "s3cr3t");
        let stdout = format!("Outputs:\nplain = v\nsecret = {}\n", secret);
        let captured = capture(&stdout, &seed).unwrap();
        assert_eq!(captured["plain"], "v");
        assert_eq!(captured["secret"], "s3cr3t");
        assert!(decode(&seed, "k", "otp:!!!").is_err());
    }
}
