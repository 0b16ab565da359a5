//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rusqlite::Connection;

use crate::{
    Error,
    db::initialize,
    email::Mailer,
    otp::{OtpStore, ResendLimiter},
};

/// The keys for signing and verifying session tokens.
#[derive(Clone)]
pub struct JwtKeys {
    /// The key for signing freshly issued tokens.
    pub encoding: EncodingKey,
    /// The key for verifying presented tokens.
    pub decoding: DecodingKey,
}

impl JwtKeys {
    /// Derive both keys from a shared `secret` string.
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// The state of the REST server.
#[derive(Clone)]
pub struct AppState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,

    /// The keys for session tokens.
    pub jwt_keys: JwtKeys,

    /// The store holding pending one-time-code challenges.
    pub otp_store: Arc<dyn OtpStore>,

    /// The per-email cap on code resends.
    pub resend_limiter: Arc<ResendLimiter>,

    /// The email delivery mechanism.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for
    /// the domain models.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        jwt_secret: &str,
        otp_store: Arc<dyn OtpStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            jwt_keys: JwtKeys::from_secret(jwt_secret),
            otp_store,
            resend_limiter: Arc::new(ResendLimiter::new()),
            mailer,
        })
    }
}

// this impl tells the `Claims` extractor how to access the keys from our state
impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_keys.clone()
    }
}

/// The state needed for the authentication endpoints.
#[derive(Clone)]
pub struct AuthState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The keys for session tokens.
    pub jwt_keys: JwtKeys,
    /// The store holding pending one-time-code challenges.
    pub otp_store: Arc<dyn OtpStore>,
    /// The per-email cap on code resends.
    pub resend_limiter: Arc<ResendLimiter>,
    /// The email delivery mechanism.
    pub mailer: Arc<dyn Mailer>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            jwt_keys: state.jwt_keys.clone(),
            otp_store: state.otp_store.clone(),
            resend_limiter: state.resend_limiter.clone(),
            mailer: state.mailer.clone(),
        }
    }
}
