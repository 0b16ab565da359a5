//! This file defines the user identity records and their queries.
//!
//! Identity is stored locally and reached only through the functions in this
//! module, so the table can be swapped for an external identity provider
//! without touching the rest of the app.

use std::fmt::Display;

use rand::{Rng, distributions::Alphanumeric};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::Error;

/// A validated email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Email(String);

impl Email {
    /// Create and validate an email address.
    ///
    /// # Errors
    /// This function will return an [Error::InvalidEmail] if `raw_email` does
    /// not look like an email address.
    pub fn new(raw_email: &str) -> Result<Self, Error> {
        let raw_email = raw_email.trim();

        match raw_email.split_once('@') {
            Some((local_part, domain)) if !local_part.is_empty() && domain.contains('.') => {
                Ok(Self(raw_email.to_string()))
            }
            _ => Err(Error::InvalidEmail(raw_email.to_string())),
        }
    }

    /// Create a new `Email` without any validation.
    ///
    /// The caller should ensure that `raw_email` is a correctly formatted
    /// email address. This function has `_unchecked` in the name but is not
    /// `unsafe`, because an incorrectly formatted email causes incorrect
    /// behaviour but does not affect memory safety.
    pub fn new_unchecked(raw_email: &str) -> Self {
        Self(raw_email.to_string())
    }

    /// The part of the address before the '@' sign.
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role granted to regular accounts.
pub const ROLE_USER: &str = "user";
/// The role required for catalog mutation.
pub const ROLE_ADMIN: &str = "admin";

/// Check that `role` is one of the accepted role tags.
///
/// # Errors
/// This function will return an [Error::InvalidRole] for anything other than
/// "user" or "admin".
pub fn validate_role(role: &str) -> Result<(), Error> {
    if role == ROLE_USER || role == ROLE_ADMIN {
        Ok(())
    } else {
        Err(Error::InvalidRole(role.to_string()))
    }
}

/// A registered account identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The opaque identifier other tables reference.
    pub uid: String,
    /// The account's email address.
    pub email: Email,
    /// The account's role claim.
    pub role: String,
}

pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS user (
            uid TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'user'
        );",
    )?;

    Ok(())
}

/// Retrieve the user with `email`.
///
/// # Errors
/// This function will return an [Error::UserNotFound] if no account exists
/// for `email`, or an error if there is an SQL error.
pub fn get_user_by_email(email: &Email, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT uid, email, role FROM user WHERE email = :email;")?
        .query_row(&[(":email", email.as_ref())], map_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UserNotFound,
            error => error.into(),
        })
}

/// Retrieve the user with `uid`.
///
/// # Errors
/// This function will return an [Error::UserNotFound] if `uid` does not refer
/// to a registered account, or an error if there is an SQL error.
pub fn get_user_by_uid(uid: &str, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT uid, email, role FROM user WHERE uid = :uid;")?
        .query_row(&[(":uid", uid)], map_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UserNotFound,
            error => error.into(),
        })
}

/// Fetch the user for `email`, creating it first if it does not exist, and
/// set its role claim to `role`.
///
/// Calling this twice with the same email returns the same uid, so account
/// confirmation can be retried safely.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn ensure_user(email: &Email, role: &str, connection: &Connection) -> Result<User, Error> {
    match get_user_by_email(email, connection) {
        Ok(user) => {
            if user.role != role {
                set_role(&user.uid, role, connection)?;
            }

            Ok(User {
                role: role.to_string(),
                ..user
            })
        }
        Err(Error::UserNotFound) => {
            let uid = new_uid();
            connection.execute(
                "INSERT INTO user (uid, email, role) VALUES (?1, ?2, ?3);",
                (&uid, email.as_ref(), role),
            )?;

            Ok(User {
                uid,
                email: email.clone(),
                role: role.to_string(),
            })
        }
        Err(error) => Err(error),
    }
}

/// Overwrite the role claim for `uid`.
///
/// # Errors
/// This function will return an [Error::UserNotFound] if `uid` does not refer
/// to a registered account, or an error if there is an SQL error.
pub fn set_role(uid: &str, role: &str, connection: &Connection) -> Result<(), Error> {
    let rows_affected =
        connection.execute("UPDATE user SET role = ?1 WHERE uid = ?2;", (role, uid))?;

    if rows_affected == 0 {
        return Err(Error::UserNotFound);
    }

    Ok(())
}

const UID_LENGTH: usize = 28;

fn new_uid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UID_LENGTH)
        .map(char::from)
        .collect()
}

fn map_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_email: String = row.get(1)?;

    Ok(User {
        uid: row.get(0)?,
        email: Email::new_unchecked(&raw_email),
        role: row.get(2)?,
    })
}

#[cfg(test)]
mod email_tests {
    use crate::{Error, user::Email};

    #[test]
    fn new_succeeds_on_plausible_address() {
        let email = Email::new("foo@bar.baz");

        assert!(email.is_ok());
    }

    #[test]
    fn new_fails_with_no_at_symbol() {
        let email = Email::new("foobar.baz");

        assert_eq!(
            email,
            Err(Error::InvalidEmail("foobar.baz".to_string()))
        );
    }

    #[test]
    fn new_fails_with_empty_string() {
        let email = Email::new("");

        assert!(email.is_err());
    }

    #[test]
    fn local_part_strips_domain() {
        let email = Email::new("alice@example.com").unwrap();

        assert_eq!(email.local_part(), "alice");
    }
}

#[cfg(test)]
mod user_query_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        user::{Email, create_user_table, ensure_user, get_user_by_email, get_user_by_uid},
    };

    fn get_test_db_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        create_user_table(&connection).expect("Could not create user table");
        connection
    }

    #[test]
    fn ensure_user_creates_account() {
        let connection = get_test_db_connection();
        let email = Email::new("foo@bar.baz").unwrap();

        let user = ensure_user(&email, "user", &connection).expect("Could not create user");

        assert_eq!(user.email, email);
        assert_eq!(user.role, "user");
        assert!(!user.uid.is_empty());
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let connection = get_test_db_connection();
        let email = Email::new("foo@bar.baz").unwrap();

        let first = ensure_user(&email, "user", &connection).expect("Could not create user");
        let second = ensure_user(&email, "user", &connection).expect("Could not fetch user");

        assert_eq!(first.uid, second.uid);
    }

    #[test]
    fn ensure_user_updates_role_claim() {
        let connection = get_test_db_connection();
        let email = Email::new("foo@bar.baz").unwrap();

        let user = ensure_user(&email, "user", &connection).expect("Could not create user");
        let updated = ensure_user(&email, "admin", &connection).expect("Could not update user");

        assert_eq!(user.uid, updated.uid);
        assert_eq!(updated.role, "admin");
        assert_eq!(
            get_user_by_uid(&user.uid, &connection).unwrap().role,
            "admin"
        );
    }

    #[test]
    fn get_user_by_email_fails_on_unknown_address() {
        let connection = get_test_db_connection();
        let email = Email::new("nobody@example.com").unwrap();

        let result = get_user_by_email(&email, &connection);

        assert_eq!(result, Err(Error::UserNotFound));
    }
}
