//! This file defines the passwordless authentication flow and the session
//! token plumbing.
//!
//! Accounts are identified by email alone. Registration and log-in both work
//! by mailing a short-lived one-time code; echoing the code back yields a
//! signed bearer token that the protected endpoints require.

use axum::{
    Json,
    RequestPartsExt,
    extract::{FromRef, FromRequestParts, State},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration, OffsetDateTime};

use crate::{
    Error,
    app_state::{AuthState, JwtKeys},
    db::acquire,
    email::{otp_message, send_with_retry},
    otp::{OtpChallenge, check_code, generate_code},
    user::{Email, ROLE_USER, ensure_user, get_user_by_email, validate_role},
    wallet::ensure_wallet,
};

/// How long a session token stays valid after issuance.
pub const TOKEN_DURATION: Duration = Duration::hours(2);

/// The claims carried by a session token.
///
/// Doubles as an extractor: any handler taking `Claims` rejects requests
/// without a valid bearer token with a 401 before the handler body runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// The uid of the authenticated account.
    pub sub: String,
    /// The account's role claim.
    pub role: String,
    /// The expiry as a unix timestamp.
    pub exp: u64,
    /// The issuance instant as a unix timestamp.
    pub iat: u64,
}

impl Claims {
    /// Check that the caller holds the admin role.
    ///
    /// # Errors
    /// This function will return an [Error::Forbidden] for any other role.
    pub fn require_admin(&self) -> Result<(), Error> {
        if self.role == crate::user::ROLE_ADMIN {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for Claims
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::InvalidToken)?;

        let keys = JwtKeys::from_ref(state);

        decode_token(bearer.token(), &keys.decoding)
    }
}

/// Sign a session token for `uid` with `role`, valid for [TOKEN_DURATION].
///
/// # Errors
/// This function will return an [Error::TokenCreation] if signing fails.
pub fn encode_token(uid: &str, role: &str, key: &EncodingKey) -> Result<String, Error> {
    let now = OffsetDateTime::now_utc();

    let claims = Claims {
        sub: uid.to_string(),
        role: role.to_string(),
        exp: (now + TOKEN_DURATION).unix_timestamp() as u64,
        iat: now.unix_timestamp() as u64,
    };

    encode(&Header::default(), &claims, key).map_err(|_| Error::TokenCreation)
}

/// Verify `token` and recover its claims.
///
/// # Errors
/// This function will return an [Error::InvalidToken] if the token is
/// malformed, has a bad signature or has expired.
pub fn decode_token(token: &str, key: &DecodingKey) -> Result<Claims, Error> {
    decode::<Claims>(token, key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| Error::InvalidToken)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The payload for starting a registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendConfirmationData {
    /// The address to register.
    pub email: String,
    /// The role the account should receive. Defaults to "user".
    #[serde(default)]
    pub role: Option<String>,
}

/// The payload for starting a log-in or requesting a resend.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmailData {
    /// The account's address.
    pub email: String,
}

/// The payload for echoing a one-time code back.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyData {
    /// The address the code was mailed to.
    pub email: String,
    /// The code from the email.
    pub code: String,
}

/// A route handler for starting a registration.
///
/// Mails a one-time code to an address that has no account yet. The account
/// itself is only created once the code comes back through the confirm
/// endpoint.
pub async fn send_confirmation_endpoint(
    State(state): State<AuthState>,
    Json(data): Json<SendConfirmationData>,
) -> Result<Response, Error> {
    let email = Email::new(&data.email)?;
    let role = data.role.as_deref().unwrap_or(ROLE_USER);
    validate_role(role)?;

    {
        let connection = acquire(&state.db_connection)?;
        if get_user_by_email(&email, &connection).is_ok() {
            return Err(Error::EmailTaken);
        }
    }

    let code = generate_code();
    state.otp_store.insert(
        email.as_ref(),
        OtpChallenge::new(code.clone(), role.to_string(), OffsetDateTime::now_utc()),
    );

    send_with_retry(state.mailer.as_ref(), &otp_message(email.as_ref(), &code)).await?;

    Ok(Json(json!({
        "success": true,
        "message": "confirmation code sent",
        "step": "CONFIRM_EMAIL",
    }))
    .into_response())
}

/// A route handler for completing a registration.
///
/// Consumes the pending code and idempotently creates the account and its
/// wallet.
pub async fn confirm_account_endpoint(
    State(state): State<AuthState>,
    Json(data): Json<VerifyData>,
) -> Result<Response, Error> {
    let email = Email::new(&data.email)?;

    let challenge = check_code(
        state.otp_store.as_ref(),
        email.as_ref(),
        &data.code,
        OffsetDateTime::now_utc(),
    )?;

    let role = if challenge.role.is_empty() {
        ROLE_USER.to_string()
    } else {
        challenge.role
    };

    let connection = acquire(&state.db_connection)?;
    let user = ensure_user(&email, &role, &connection)?;
    let wallet = ensure_wallet(&user.uid, &email, &role, None, &connection)?;

    let token = encode_token(&user.uid, &user.role, &state.jwt_keys.encoding)?;

    Ok(Json(json!({
        "success": true,
        "message": "account confirmed",
        "uid": user.uid,
        "wallet_id": wallet.id,
        "token": token,
        "role": user.role,
    }))
    .into_response())
}

/// A route handler for starting a log-in.
///
/// Mails a one-time code to an existing account's address.
pub async fn login_endpoint(
    State(state): State<AuthState>,
    Json(data): Json<EmailData>,
) -> Result<Response, Error> {
    let email = Email::new(&data.email)?;

    let uid = {
        let connection = acquire(&state.db_connection)?;
        get_user_by_email(&email, &connection)?.uid
    };

    // Log-in challenges carry no role, the account keeps the one it has.
    let code = generate_code();
    state.otp_store.insert(
        email.as_ref(),
        OtpChallenge::new(code.clone(), String::new(), OffsetDateTime::now_utc()),
    );

    send_with_retry(state.mailer.as_ref(), &otp_message(email.as_ref(), &code)).await?;

    Ok(Json(json!({
        "success": true,
        "message": "verification code sent",
        "step": "VERIFY_OTP",
        "uid": uid,
    }))
    .into_response())
}

/// A route handler for completing a log-in.
///
/// Consumes the pending code and returns a fresh session token.
pub async fn verify_otp_endpoint(
    State(state): State<AuthState>,
    Json(data): Json<VerifyData>,
) -> Result<Response, Error> {
    let email = Email::new(&data.email)?;

    check_code(
        state.otp_store.as_ref(),
        email.as_ref(),
        &data.code,
        OffsetDateTime::now_utc(),
    )?;

    let user = {
        let connection = acquire(&state.db_connection)?;
        get_user_by_email(&email, &connection)?
    };

    let token = encode_token(&user.uid, &user.role, &state.jwt_keys.encoding)?;

    Ok(Json(json!({
        "success": true,
        "message": "logged in",
        "token": token,
        "role": user.role,
        "uid": user.uid,
    }))
    .into_response())
}

/// A route handler for reissuing a one-time code.
///
/// Capped per email at three resends in any five minute window.
pub async fn resend_otp_endpoint(
    State(state): State<AuthState>,
    Json(data): Json<EmailData>,
) -> Result<Response, Error> {
    let email = Email::new(&data.email)?;
    let now = OffsetDateTime::now_utc();

    state.resend_limiter.check_and_record(email.as_ref(), now)?;

    {
        let connection = acquire(&state.db_connection)?;
        get_user_by_email(&email, &connection)?;
    }

    let code = generate_code();
    state.otp_store.insert(
        email.as_ref(),
        OtpChallenge::new(code.clone(), String::new(), now),
    );

    send_with_retry(state.mailer.as_ref(), &otp_message(email.as_ref(), &code)).await?;

    Ok(Json(json!({
        "success": true,
        "message": "new code sent",
    }))
    .into_response())
}

#[cfg(test)]
mod token_tests {
    use jsonwebtoken::{DecodingKey, EncodingKey};

    use crate::{
        Error,
        auth::{decode_token, encode_token},
    };

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn round_trip_preserves_claims() {
        let token = encode_token("test-uid", "admin", &EncodingKey::from_secret(SECRET))
            .expect("Could not encode token");

        let claims = decode_token(&token, &DecodingKey::from_secret(SECRET))
            .expect("Could not decode token");

        assert_eq!(claims.sub, "test-uid");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token =
            encode_token("test-uid", "user", &EncodingKey::from_secret(SECRET)).unwrap();

        let result = decode_token(&token, &DecodingKey::from_secret(b"other-secret"));

        assert_eq!(result, Err(Error::InvalidToken));
    }

    #[test]
    fn garbage_is_rejected() {
        let result = decode_token(
            "not.a.token",
            &DecodingKey::from_secret(SECRET),
        );

        assert_eq!(result, Err(Error::InvalidToken));
    }

    #[test]
    fn require_admin_gates_on_role() {
        let token = encode_token("test-uid", "user", &EncodingKey::from_secret(SECRET)).unwrap();
        let claims = decode_token(&token, &DecodingKey::from_secret(SECRET)).unwrap();

        assert_eq!(claims.require_admin(), Err(Error::Forbidden));
    }
}
