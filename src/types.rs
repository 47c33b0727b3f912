use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use sha2::{Digest as ShaDigest, Sha256};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserKey(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagKey(pub Ulid);

impl UserKey {
    pub fn generate() -> Self {
        UserKey(Ulid::new())
    }
}

impl TagKey {
    pub fn generate() -> Self {
        TagKey(Ulid::new())
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserKey {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(UserKey)
    }
}

impl FromStr for TagKey {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(TagKey)
    }
}

/// Average Gregorian month, in nanoseconds. Vote ages are continuous
/// fractions of this unit, never calendar months.
pub const NANOS_PER_MONTH: f64 = 365.2425 / 12.0 * 86_400.0 * 1_000_000_000.0;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds since the Unix epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Fractional months from `earlier` to `self`; negative if `earlier` is later.
    pub fn months_since(self, earlier: Timestamp) -> f64 {
        (self.0 as f64 - earlier.0 as f64) / NANOS_PER_MONTH
    }

    pub fn plus_months(self, months: f64) -> Timestamp {
        let delta = (months.max(0.0) * NANOS_PER_MONTH) as u64;
        Timestamp(self.0.saturating_add(delta))
    }

    pub fn plus_secs(self, secs: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(secs.saturating_mul(NANOS_PER_SEC)))
    }
}

pub fn now_timestamp() -> Timestamp {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    Timestamp(nanos)
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now_timestamp()
    }
}

/// Hand-driven clock for tests and the REPL.
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { nanos: AtomicU64::new(start.0) }
    }

    pub fn set(&self, at: Timestamp) {
        self.nanos.store(at.0, Ordering::SeqCst);
    }

    pub fn advance_months(&self, months: f64) {
        let next = self.now().plus_months(months);
        self.set(next);
    }

    pub fn advance_secs(&self, secs: u64) {
        let next = self.now().plus_secs(secs);
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::SeqCst))
    }
}

/// SHA-256 over the JSON text of a payload. `serde_json::Value` keeps object
/// keys sorted, so equal payloads always hash equal.
pub fn compute_digest(value: &serde_json::Value) -> Digest {
    let json = value.to_string();
    let mut h = Sha256::new();
    h.update(json.as_bytes());
    let out = h.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out[..32]);
    Digest(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_are_continuous_and_signed() {
        let t0 = Timestamp(0);
        let t1 = t0.plus_months(1.5);
        assert!((t1.months_since(t0) - 1.5).abs() < 1e-9);
        assert!((t0.months_since(t1) + 1.5).abs() < 1e-9);
    }

    #[test]
    fn keys_round_trip_through_strings() {
        let u = UserKey::generate();
        let parsed: UserKey = u.to_string().parse().unwrap();
        assert_eq!(u, parsed);
        assert!("not-a-ulid".parse::<TagKey>().is_err());
    }

    #[test]
    fn digest_ignores_field_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(compute_digest(&a), compute_digest(&b));
        assert_eq!(compute_digest(&a).to_hex().len(), 64);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp(10));
        clock.advance_secs(2);
        assert_eq!(clock.now(), Timestamp(10 + 2 * NANOS_PER_SEC));
    }
}
