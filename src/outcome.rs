use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One record per dispatched sequence number.
///
/// `error` is empty iff the request obtained a response with a status in
/// `[200, 400)` and the whole body was read. Failed hits keep `code = 0`
/// and `latency = 0` when the failure happened before a response arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Name of the attack this hit belongs to.
    pub attack: String,
    /// Monotonic, gap-free per attack.
    pub seq: u64,
    /// HTTP status code; 0 when no response was obtained.
    pub code: u16,
    /// Absolute instant the request was sent.
    pub timestamp: SystemTime,
    /// Send to full body read.
    pub latency: Duration,
    /// Request body bytes written; 0 for empty bodies.
    pub bytes_out: u64,
    /// Response body bytes read.
    pub bytes_in: u64,
    /// Response body, read to EOF and retained.
    pub body: Bytes,
    pub error: String,
}

impl Outcome {
    pub(crate) fn new(attack: &str, seq: u64) -> Self {
        Self {
            attack: attack.to_owned(),
            seq,
            code: 0,
            timestamp: SystemTime::UNIX_EPOCH,
            latency: Duration::ZERO,
            bytes_out: 0,
            bytes_in: 0,
            body: Bytes::new(),
            error: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_outcome_is_successful_until_an_error_lands() {
        let mut out = Outcome::new("smoke", 3);
        assert!(out.success());
        out.error = "503 Service Unavailable".to_owned();
        assert!(!out.success());
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let mut out = Outcome::new("encode", 7);
        out.code = 200;
        out.timestamp = SystemTime::now();
        out.latency = Duration::from_millis(12);
        out.bytes_in = 5;
        out.body = Bytes::from_static(b"hello");

        let encoded = serde_json::to_string(&out).expect("encode");
        let decoded: Outcome = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, out);
    }
}
