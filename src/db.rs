//! Utility functions for initializing and accessing the database.

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::{
    Error, activity_type::create_activity_type_table, transaction::create_transaction_table,
    user::create_user_table, wallet::create_wallet_table,
};

/// Create the application tables in the database.
///
/// # Errors
/// This function will return an error if the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    create_user_table(connection)?;
    create_wallet_table(connection)?;
    create_activity_type_table(connection)?;
    create_transaction_table(connection)?;

    Ok(())
}

/// Lock the shared database connection.
///
/// # Errors
/// This function will return an [Error::DatabaseLockError] if the lock is
/// poisoned.
pub fn acquire(connection: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, Error> {
    connection.lock().map_err(|error| {
        tracing::error!("could not acquire database lock: {}", error);
        Error::DatabaseLockError
    })
}
