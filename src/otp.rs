//! One-time-passcode challenges and the store that holds them.
//!
//! Challenges are short-lived by design, so they live in server memory
//! behind the [OtpStore] trait rather than in the database. The trait keeps
//! the door open for a shared store in multi-instance deployments.

use std::{collections::HashMap, sync::Mutex};

use rand::Rng;
use time::{Duration, OffsetDateTime};

use crate::Error;

/// How long a code stays valid after issuance.
pub const CODE_TTL: Duration = Duration::minutes(5);

/// How many failed verifications are tolerated before the challenge is
/// discarded.
pub const MAX_VERIFY_ATTEMPTS: u32 = 5;

const CODE_LENGTH: usize = 6;

/// A pending one-time-passcode challenge for a single email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// The numeric code the user must echo back.
    pub code: String,
    /// The role the account should receive once confirmed. Empty for log-in
    /// challenges, which keep the account's existing role.
    pub role: String,
    /// The instant after which the code is no longer accepted.
    pub expires_at: OffsetDateTime,
    /// How many failed verifications have been recorded.
    pub attempts: u32,
}

impl OtpChallenge {
    /// Create a challenge expiring [CODE_TTL] after `now`.
    pub fn new(code: String, role: String, now: OffsetDateTime) -> Self {
        Self {
            code,
            role,
            expires_at: now + CODE_TTL,
            attempts: 0,
        }
    }
}

/// Generate a random numeric code of [CODE_LENGTH] digits.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();

    (0..CODE_LENGTH)
        .map(|_| char::from_digit(rng.gen_range(0..10), 10).unwrap_or('0'))
        .collect()
}

/// Storage for pending challenges, keyed by email.
///
/// Implementations are not required to be linearizable: two racing verify
/// attempts for the same email are low-stakes and tolerated.
pub trait OtpStore: Send + Sync {
    /// Store `challenge` for `email`, overwriting any pending challenge.
    fn insert(&self, email: &str, challenge: OtpChallenge);

    /// The pending challenge for `email`, if any.
    fn get(&self, email: &str) -> Option<OtpChallenge>;

    /// Discard the pending challenge for `email`.
    fn remove(&self, email: &str);

    /// Count a failed verification against the pending challenge.
    fn record_failed_attempt(&self, email: &str);

    /// Drop every challenge whose expiry is before `now`.
    fn evict_expired(&self, now: OffsetDateTime);
}

/// The default process-local [OtpStore].
#[derive(Debug, Default)]
pub struct InMemoryOtpStore {
    challenges: Mutex<HashMap<String, OtpChallenge>>,
}

impl InMemoryOtpStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtpStore for InMemoryOtpStore {
    fn insert(&self, email: &str, challenge: OtpChallenge) {
        self.challenges
            .lock()
            .unwrap()
            .insert(email.to_string(), challenge);
    }

    fn get(&self, email: &str) -> Option<OtpChallenge> {
        self.challenges.lock().unwrap().get(email).cloned()
    }

    fn remove(&self, email: &str) {
        self.challenges.lock().unwrap().remove(email);
    }

    fn record_failed_attempt(&self, email: &str) {
        if let Some(challenge) = self.challenges.lock().unwrap().get_mut(email) {
            challenge.attempts += 1;
        }
    }

    fn evict_expired(&self, now: OffsetDateTime) {
        self.challenges
            .lock()
            .unwrap()
            .retain(|_, challenge| challenge.expires_at >= now);
    }
}

/// Validate `code` against the pending challenge for `email` and consume the
/// challenge on success.
///
/// # Errors
/// This function will return:
/// - [Error::NoPendingCode] if there is no challenge for `email`,
/// - [Error::TooManyAttempts] once [MAX_VERIFY_ATTEMPTS] failures have
///   accumulated (the challenge is discarded),
/// - [Error::CodeExpired] past the challenge's expiry (discarded),
/// - [Error::InvalidCode] on a mismatch, counting the failed attempt first.
pub fn check_code(
    store: &dyn OtpStore,
    email: &str,
    code: &str,
    now: OffsetDateTime,
) -> Result<OtpChallenge, Error> {
    let challenge = store.get(email).ok_or(Error::NoPendingCode)?;

    if challenge.attempts >= MAX_VERIFY_ATTEMPTS {
        store.remove(email);
        return Err(Error::TooManyAttempts);
    }

    if now > challenge.expires_at {
        store.remove(email);
        return Err(Error::CodeExpired);
    }

    if code != challenge.code {
        store.record_failed_attempt(email);
        return Err(Error::InvalidCode);
    }

    store.remove(email);

    Ok(challenge)
}

/// How many resends are allowed per email within [RESEND_WINDOW].
pub const MAX_RESENDS: usize = 3;

/// The sliding window for the resend cap.
pub const RESEND_WINDOW: Duration = Duration::minutes(5);

/// A per-email sliding-window cap on code resends.
#[derive(Debug, Default)]
pub struct ResendLimiter {
    requests: Mutex<HashMap<String, Vec<OffsetDateTime>>>,
}

impl ResendLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resend for `email` at `now`.
    ///
    /// # Errors
    /// This function will return an [Error::ResendLimitExceeded] once
    /// [MAX_RESENDS] resends have happened within [RESEND_WINDOW].
    pub fn check_and_record(&self, email: &str, now: OffsetDateTime) -> Result<(), Error> {
        let mut requests = self.requests.lock().unwrap();
        let timestamps = requests.entry(email.to_string()).or_default();

        timestamps.retain(|&timestamp| now - timestamp < RESEND_WINDOW);

        if timestamps.len() >= MAX_RESENDS {
            return Err(Error::ResendLimitExceeded);
        }

        timestamps.push(now);

        Ok(())
    }
}


#[cfg(test)]
mod resend_limiter_tests {
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        otp::{MAX_RESENDS, ResendLimiter},
    };

    const EMAIL: &str = "foo@bar.baz";

    #[test]
    fn cap_is_enforced_within_window() {
        let limiter = ResendLimiter::new();
        let now = OffsetDateTime::now_utc();

        for _ in 0..MAX_RESENDS {
            assert!(limiter.check_and_record(EMAIL, now).is_ok());
        }

        assert_eq!(
            limiter.check_and_record(EMAIL, now),
            Err(Error::ResendLimitExceeded)
        );
    }

    #[test]
    fn cap_resets_after_window() {
        let limiter = ResendLimiter::new();
        let start = OffsetDateTime::now_utc();

        for _ in 0..MAX_RESENDS {
            assert!(limiter.check_and_record(EMAIL, start).is_ok());
        }

        let later = start + Duration::minutes(6);

        assert!(limiter.check_and_record(EMAIL, later).is_ok());
    }

    #[test]
    fn cap_is_tracked_per_email() {
        let limiter = ResendLimiter::new();
        let now = OffsetDateTime::now_utc();

        for _ in 0..MAX_RESENDS {
            assert!(limiter.check_and_record(EMAIL, now).is_ok());
        }

        assert!(limiter.check_and_record("other@example.com", now).is_ok());
    }
}
