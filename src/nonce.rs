//! Response nonces: generation and replay detection.
//!
//! A nonce is a UTC timestamp (`YYYY-MM-DDTHH:MM:SSZ`, 20 characters)
//! followed by a unique suffix.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use ulid::Ulid;

const TIMESTAMP_LEN: usize = 20;
const MAX_NONCE_LEN: usize = 255;

static TIMESTAMP_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z").ok());

/// Default replay window in seconds.
pub const DEFAULT_MAX_AGE: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonceResult {
    Ok,
    Seen,
    InvalidTimestamp,
    TooOld,
}

impl NonceResult {
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for NonceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Seen => "nonce already seen",
            Self::InvalidTimestamp => "invalid nonce timestamp",
            Self::TooOld => "nonce too old",
        })
    }
}

/// Syntax check used by message validation: length limit and timestamp prefix.
#[must_use]
pub fn is_well_formed(nonce: &str) -> bool {
    nonce.len() <= MAX_NONCE_LEN
        && TIMESTAMP_PREFIX
            .as_ref()
            .is_some_and(|re| re.is_match(nonce))
}

/// Parse the leading timestamp of `nonce`.
#[must_use]
pub fn timestamp(nonce: &str) -> Option<OffsetDateTime> {
    let prefix = nonce.get(..TIMESTAMP_LEN)?;
    OffsetDateTime::parse(prefix, &Rfc3339).ok()
}

/// Produces timestamped unique nonces.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceGenerator;

impl NonceGenerator {
    #[must_use]
    pub fn generate(&self) -> String {
        let now = OffsetDateTime::now_utc();
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let stamp = now.format(&Rfc3339).unwrap_or_default();
        format!("{stamp}{}", Ulid::new())
    }
}

/// Replay defense keyed by (OP endpoint, nonce).
///
/// `seen` must be a single atomic check-and-insert: two concurrent calls with
/// the same pair can never both return [`NonceResult::Ok`].
pub trait NonceVerifier: Send + Sync {
    fn seen(&self, op_url: &str, nonce: &str) -> NonceResult;

    fn max_age(&self) -> u64;

    fn set_max_age(&self, seconds: u64);
}

#[derive(Debug)]
pub struct InMemoryNonceVerifier {
    max_age: AtomicU64,
    seen: Mutex<HashMap<(String, String), OffsetDateTime>>,
}

impl Default for InMemoryNonceVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl InMemoryNonceVerifier {
    #[must_use]
    pub fn new(max_age: u64) -> Self {
        Self {
            max_age: AtomicU64::new(max_age),
            seen: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn max_age_duration(&self) -> Duration {
        let seconds = i64::try_from(self.max_age()).unwrap_or(i64::MAX);
        Duration::seconds(seconds)
    }
}

impl NonceVerifier for InMemoryNonceVerifier {
    fn seen(&self, op_url: &str, nonce: &str) -> NonceResult {
        let Some(stamp) = timestamp(nonce) else {
            debug!(op_url, "rejecting nonce with unparsable timestamp");
            return NonceResult::InvalidTimestamp;
        };

        let now = OffsetDateTime::now_utc();
        let max_age = self.max_age_duration();
        if now - stamp > max_age {
            debug!(op_url, "rejecting expired nonce");
            return NonceResult::TooOld;
        }

        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.retain(|_, stamp| now - *stamp <= max_age);

        let key = (op_url.to_string(), nonce.to_string());
        if seen.contains_key(&key) {
            debug!(op_url, "nonce replay detected");
            return NonceResult::Seen;
        }
        seen.insert(key, stamp);
        NonceResult::Ok
    }

    fn max_age(&self) -> u64 {
        self.max_age.load(Ordering::Relaxed)
    }

    fn set_max_age(&self, seconds: u64) {
        self.max_age.store(seconds, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const OP: &str = "https://op.example/server";

    #[test]
    fn generated_nonces_are_well_formed_and_unique() {
        let generator = NonceGenerator;
        let a = generator.generate();
        let b = generator.generate();
        assert_ne!(a, b);
        assert!(is_well_formed(&a));
        assert!(timestamp(&a).is_some());
        assert!(a.ends_with(|c: char| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn second_sighting_is_seen() {
        let verifier = InMemoryNonceVerifier::default();
        let nonce = NonceGenerator.generate();
        assert_eq!(verifier.seen(OP, &nonce), NonceResult::Ok);
        assert_eq!(verifier.seen(OP, &nonce), NonceResult::Seen);
        assert_eq!(
            verifier.seen("https://other.example/", &nonce),
            NonceResult::Ok
        );
    }

    #[test]
    fn old_nonce_is_too_old_regardless_of_history() {
        let verifier = InMemoryNonceVerifier::new(60);
        let nonce = "2001-01-01T00:00:00Zabc";
        assert_eq!(verifier.seen(OP, nonce), NonceResult::TooOld);
        assert_eq!(verifier.seen(OP, nonce), NonceResult::TooOld);
        assert!(verifier.is_empty());
    }

    #[test]
    fn unparsable_timestamp() {
        let verifier = InMemoryNonceVerifier::default();
        assert_eq!(verifier.seen(OP, "garbage"), NonceResult::InvalidTimestamp);
        assert_eq!(
            verifier.seen(OP, "2026-13-45T99:00:00Zabc"),
            NonceResult::InvalidTimestamp
        );
    }

    #[test]
    fn max_age_is_adjustable() {
        let verifier = InMemoryNonceVerifier::default();
        assert_eq!(verifier.max_age(), DEFAULT_MAX_AGE);
        verifier.set_max_age(0);
        assert_eq!(verifier.max_age(), 0);
    }

    #[test]
    fn concurrent_replay_yields_one_ok() {
        let verifier = Arc::new(InMemoryNonceVerifier::default());
        let nonce = NonceGenerator.generate();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let verifier = Arc::clone(&verifier);
                let nonce = nonce.clone();
                thread::spawn(move || verifier.seen(OP, &nonce))
            })
            .collect();

        let results: Vec<NonceResult> = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect();
        assert_eq!(results.len(), 8);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results.iter().filter(|r| **r == NonceResult::Seen).count(),
            7
        );
    }

    #[test]
    fn well_formed_checks_length() {
        let long = format!("2026-10-19T12:00:00Z{}", "a".repeat(300));
        assert!(!is_well_formed(&long));
        assert!(!is_well_formed("19-10-2026"));
    }

    #[test]
    fn well_formed_requires_timestamp_prefix() {
        assert!(is_well_formed("2026-10-19T12:00:00Zsuffix"));
        assert!(!is_well_formed("2026-10-19 12:00:00Zsuffix"));
    }
}
