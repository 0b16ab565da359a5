//! Defines the app level error type and its conversion to JSON API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::activity_type::ActivityTypeId;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A monetary amount was zero or negative.
    #[error("the amount must be greater than zero")]
    InvalidAmount,

    /// A debit was requested that would drive the wallet balance negative.
    ///
    /// Carries the current balance and the required amount so the client can
    /// show the shortfall.
    #[error("insufficient funds: current balance is {current}, required {required}")]
    InsufficientFunds {
        /// The wallet balance at the time of the check.
        current: i64,
        /// The amount the debit asked for.
        required: i64,
    },

    /// Tried to reset a wallet balance that is already zero.
    #[error("the wallet balance is already zero")]
    BalanceAlreadyEmpty,

    /// The caller has no wallet. The account confirmation flow creates one.
    #[error("no wallet found for this account")]
    WalletNotFound,

    /// The transaction ID did not match a transaction in the database.
    #[error("the transaction could not be found")]
    TransactionNotFound,

    /// The transaction belongs to another user's wallet.
    #[error("this transaction does not belong to you")]
    NotOwner,

    /// The activity type ID used to create a transaction did not match a
    /// valid activity type.
    #[error("the activity type ID does not refer to a valid activity type")]
    InvalidActivityType(Option<ActivityTypeId>),

    /// The specified activity type name already exists in the database.
    #[error("the activity type \"{0}\" already exists")]
    DuplicateActivityTypeName(String),

    /// An empty string was used for an activity type name.
    #[error("activity type name cannot be empty")]
    EmptyActivityTypeName,

    /// Tried to delete an activity type that transactions still reference.
    #[error("cannot delete this activity type: {count} transaction(s) reference it")]
    ActivityTypeInUse {
        /// How many transactions reference the activity type.
        count: i64,
    },

    /// The string given for an email address is not a plausible email address.
    #[error("\"{0}\" is not a valid email address")]
    InvalidEmail(String),

    /// The email already has an account, so registration cannot proceed.
    #[error("an account already exists for this email")]
    EmailTaken,

    /// The email does not belong to a registered account.
    #[error("no account found for this email")]
    UserNotFound,

    /// A role outside the accepted set was supplied.
    #[error("\"{0}\" is not a valid role")]
    InvalidRole(String),

    /// There is no pending one-time code for the email.
    #[error("no pending code for this email, request a new one")]
    NoPendingCode,

    /// The pending one-time code has passed its expiry.
    #[error("the code has expired, request a new one")]
    CodeExpired,

    /// The supplied one-time code did not match the pending one.
    #[error("invalid code")]
    InvalidCode,

    /// Too many failed verification attempts for the pending code.
    #[error("too many attempts, request a new code")]
    TooManyAttempts,

    /// The per-email resend cap was hit.
    #[error("too many resend requests, try again later")]
    ResendLimitExceeded,

    /// The session token is missing, malformed or expired.
    #[error("missing or invalid token")]
    InvalidToken,

    /// The caller's role does not permit the operation.
    #[error("insufficient permissions")]
    Forbidden,

    /// Signing the session token failed.
    #[error("could not create session token")]
    TokenCreation,

    /// Email delivery failed after all retry attempts.
    ///
    /// The string is the mailer's last error, surfaced for diagnostics.
    #[error("email delivery failed: {0}")]
    EmailDelivery(String),

    /// A query used a foreign key that does not exist.
    #[error("a referenced record does not exist")]
    InvalidForeignKey,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The statement export could not be written.
    #[error("could not generate the statement: {0}")]
    StatementError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("activity_type.name") =>
            {
                Error::DuplicateActivityTypeName(String::new())
            }
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == 787 =>
            {
                Error::InvalidForeignKey
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidAmount
            | Error::InsufficientFunds { .. }
            | Error::BalanceAlreadyEmpty
            | Error::InvalidActivityType(_)
            | Error::DuplicateActivityTypeName(_)
            | Error::EmptyActivityTypeName
            | Error::ActivityTypeInUse { .. }
            | Error::InvalidEmail(_)
            | Error::EmailTaken
            | Error::UserNotFound
            | Error::InvalidRole(_)
            | Error::NoPendingCode
            | Error::CodeExpired
            | Error::InvalidCode
            | Error::InvalidForeignKey => StatusCode::BAD_REQUEST,
            Error::InvalidToken => StatusCode::UNAUTHORIZED,
            Error::NotOwner | Error::Forbidden => StatusCode::FORBIDDEN,
            Error::WalletNotFound | Error::TransactionNotFound | Error::NotFound => {
                StatusCode::NOT_FOUND
            }
            Error::TooManyAttempts | Error::ResendLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Error::TokenCreation
            | Error::StatementError(_)
            | Error::EmailDelivery(_)
            | Error::SqlError(_)
            | Error::DatabaseLockError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));

        (status_code, body).into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::Error;

    #[test]
    fn insufficient_funds_reports_both_amounts() {
        let error = Error::InsufficientFunds {
            current: 3000,
            required: 5000,
        };

        let message = error.to_string();

        assert!(message.contains("3000"), "message was: {message}");
        assert!(message.contains("5000"), "message was: {message}");
    }

    #[test]
    fn attempt_cap_maps_to_429() {
        let response = Error::TooManyAttempts.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn ownership_mismatch_maps_to_403() {
        let response = Error::NotOwner.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let error: Error = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(error, Error::NotFound);
    }
}
