//! This file defines the `Transaction` type (a single wallet debit), its
//! queries and the API routes for recording and deleting expenses.
//!
//! The balance check and the debit happen inside one immediate SQL
//! transaction, so a wallet can never be driven negative by racing requests.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    activity_type::ActivityTypeId,
    auth::Claims,
    db::acquire,
    wallet::WalletId,
};

pub type TransactionId = i64;

/// An expense recorded against a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The wallet the amount was debited from.
    pub wallet_id: WalletId,
    /// The category the expense falls under.
    pub activity_type_id: ActivityTypeId,
    /// The debited amount in minor units. Always positive.
    pub amount: i64,
    /// An optional free-form note.
    pub note: Option<String>,
    /// When the expense was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A transaction joined with a summary of its activity type, the shape the
/// history endpoints return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionWithActivityType {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The debited amount in minor units.
    pub amount: i64,
    /// An optional free-form note.
    pub note: Option<String>,
    /// When the expense was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// The expense's category.
    pub activity_type: ActivityTypeSummary,
}

/// The subset of an activity type shown inline with a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityTypeSummary {
    /// The ID of the activity type.
    pub id: ActivityTypeId,
    /// The name of the activity type.
    pub name: String,
    /// The icon label, if any.
    pub icon: Option<String>,
}

pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS wallet_transaction (
            id INTEGER PRIMARY KEY,
            wallet_id INTEGER NOT NULL REFERENCES wallet(id),
            activity_type_id INTEGER NOT NULL REFERENCES activity_type(id),
            amount INTEGER NOT NULL CHECK (amount > 0),
            note TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_wallet_transaction_wallet_id
            ON wallet_transaction(wallet_id);",
    )?;

    Ok(())
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Record an expense against the wallet owned by `user_uid`, debiting its
/// balance.
///
/// The read-check-write runs inside an immediate SQL transaction so that two
/// concurrent debits can never overdraw the wallet.
///
/// # Errors
/// This function will return an [Error::InvalidAmount] if `amount` is zero or
/// negative, an [Error::WalletNotFound] if the account has no wallet, an
/// [Error::InvalidActivityType] if `activity_type_id` does not refer to a
/// valid activity type, an [Error::InsufficientFunds] carrying the current
/// balance and the required amount if the wallet cannot cover the debit, or
/// an error if there is an SQL error.
pub fn create_transaction(
    user_uid: &str,
    activity_type_id: ActivityTypeId,
    amount: i64,
    note: Option<&str>,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }

    let sql_transaction =
        rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let (wallet_id, balance): (WalletId, i64) = sql_transaction
        .prepare("SELECT id, balance FROM wallet WHERE user_uid = :uid;")?
        .query_row(&[(":uid", user_uid)], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::WalletNotFound,
            error => error.into(),
        })?;

    let activity_type_exists: bool = sql_transaction
        .prepare("SELECT EXISTS (SELECT 1 FROM activity_type WHERE id = :id);")?
        .query_row(&[(":id", &activity_type_id)], |row| row.get(0))?;

    if !activity_type_exists {
        return Err(Error::InvalidActivityType(Some(activity_type_id)));
    }

    if balance < amount {
        return Err(Error::InsufficientFunds {
            current: balance,
            required: amount,
        });
    }

    let created_at = OffsetDateTime::now_utc();
    let id: TransactionId = sql_transaction
        .prepare(
            "INSERT INTO wallet_transaction (wallet_id, activity_type_id, amount, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id;",
        )?
        .query_row(
            (wallet_id, activity_type_id, amount, note, created_at),
            |row| row.get(0),
        )?;

    sql_transaction.execute(
        "UPDATE wallet SET balance = balance - ?1, updated_at = ?2 WHERE id = ?3;",
        (amount, created_at, wallet_id),
    )?;

    sql_transaction.commit()?;

    Ok(Transaction {
        id,
        wallet_id,
        activity_type_id,
        amount,
        note: note.map(str::to_string),
        created_at,
    })
}

/// Delete the transaction with `transaction_id` and refund its amount to the
/// wallet it was debited from.
///
/// # Errors
/// This function will return an [Error::TransactionNotFound] if
/// `transaction_id` does not refer to a valid transaction, an
/// [Error::NotOwner] if the transaction belongs to another user's wallet, or
/// an error if there is an SQL error.
pub fn delete_transaction(
    user_uid: &str,
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let sql_transaction =
        rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Immediate)?;

    let (transaction, owner_uid): (Transaction, String) = sql_transaction
        .prepare(
            "SELECT t.id, t.wallet_id, t.activity_type_id, t.amount, t.note, t.created_at,
                    w.user_uid
             FROM wallet_transaction t
             INNER JOIN wallet w ON w.id = t.wallet_id
             WHERE t.id = :id;",
        )?
        .query_row(&[(":id", &transaction_id)], |row| {
            Ok((map_row(row)?, row.get(6)?))
        })
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::TransactionNotFound,
            error => error.into(),
        })?;

    if owner_uid != user_uid {
        return Err(Error::NotOwner);
    }

    sql_transaction.execute(
        "UPDATE wallet SET balance = balance + ?1, updated_at = ?2 WHERE id = ?3;",
        (
            transaction.amount,
            OffsetDateTime::now_utc(),
            transaction.wallet_id,
        ),
    )?;
    sql_transaction.execute(
        "DELETE FROM wallet_transaction WHERE id = ?1;",
        [transaction_id],
    )?;

    sql_transaction.commit()?;

    Ok(transaction)
}

/// Retrieve the transactions for `wallet_id` with their activity type
/// summaries, newest first, capped at `limit`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_transactions_for_wallet(
    wallet_id: WalletId,
    limit: u32,
    connection: &Connection,
) -> Result<Vec<TransactionWithActivityType>, Error> {
    connection
        .prepare(
            "SELECT t.id, t.amount, t.note, t.created_at, at.id, at.name, at.icon
             FROM wallet_transaction t
             INNER JOIN activity_type at ON at.id = t.activity_type_id
             WHERE t.wallet_id = :wallet_id
             ORDER BY t.created_at DESC, t.id DESC
             LIMIT :limit;",
        )?
        .query_map(
            rusqlite::named_params! {":wallet_id": wallet_id, ":limit": limit},
            |row| {
                Ok(TransactionWithActivityType {
                    id: row.get(0)?,
                    amount: row.get(1)?,
                    note: row.get(2)?,
                    created_at: row.get(3)?,
                    activity_type: ActivityTypeSummary {
                        id: row.get(4)?,
                        name: row.get(5)?,
                        icon: row.get(6)?,
                    },
                })
            },
        )?
        .map(|result| result.map_err(|error| error.into()))
        .collect()
}

fn map_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        wallet_id: row.get(1)?,
        activity_type_id: row.get(2)?,
        amount: row.get(3)?,
        note: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The state needed for the transaction endpoints.
#[derive(Clone)]
pub struct TransactionState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for TransactionState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The payload for recording an expense.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionData {
    /// The category the expense falls under.
    pub activity_type_id: ActivityTypeId,
    /// The amount to debit, in minor units. Must be positive.
    pub amount: i64,
    /// An optional free-form note.
    #[serde(default)]
    pub note: Option<String>,
}

/// A route handler for recording an expense against the caller's wallet.
pub async fn create_transaction_endpoint(
    State(state): State<TransactionState>,
    claims: Claims,
    Json(data): Json<TransactionData>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let transaction = create_transaction(
        &claims.sub,
        data.activity_type_id,
        data.amount,
        data.note.as_deref(),
        &connection,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "transaction recorded",
            "data": transaction,
        })),
    )
        .into_response())
}

/// A route handler for deleting one of the caller's transactions.
///
/// The transaction's amount is refunded to the wallet.
pub async fn delete_transaction_endpoint(
    State(state): State<TransactionState>,
    claims: Claims,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let transaction = delete_transaction(&claims.sub, transaction_id, &connection)?;

    Ok(Json(json!({
        "success": true,
        "message": "transaction deleted and amount refunded",
        "data": { "refunded": transaction.amount },
    }))
    .into_response())
}

#[cfg(test)]
mod transaction_query_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        activity_type::{ActivityTypeId, create_activity_type},
        db::initialize,
        transaction::{create_transaction, delete_transaction, get_transactions_for_wallet},
        user::Email,
        wallet::{WalletId, add_funds, ensure_wallet, get_wallet_by_uid},
    };

    const UID: &str = "test-uid";

    fn setup(balance: i64) -> (Connection, WalletId, ActivityTypeId) {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).expect("Could not initialize database");

        let email = Email::new("foo@bar.baz").unwrap();
        let wallet = ensure_wallet(UID, &email, "user", None, &connection).unwrap();
        if balance > 0 {
            add_funds(UID, balance, &connection).unwrap();
        }
        let activity_type = create_activity_type("Groceries", None, None, &connection).unwrap();

        (connection, wallet.id, activity_type.id)
    }

    fn balance_of(connection: &Connection) -> i64 {
        get_wallet_by_uid(UID, connection).unwrap().balance
    }

    #[test]
    fn create_transaction_debits_the_wallet() {
        let (connection, _, activity_type_id) = setup(10_000);

        let transaction = create_transaction(UID, activity_type_id, 4000, Some("veggies"), &connection)
            .expect("Could not create transaction");

        assert_eq!(transaction.amount, 4000);
        assert_eq!(transaction.note.as_deref(), Some("veggies"));
        assert_eq!(balance_of(&connection), 6000);
    }

    #[test]
    fn delete_transaction_restores_the_balance() {
        let (connection, _, activity_type_id) = setup(10_000);
        let transaction = create_transaction(UID, activity_type_id, 4000, None, &connection).unwrap();
        assert_eq!(balance_of(&connection), 6000);

        let deleted = delete_transaction(UID, transaction.id, &connection)
            .expect("Could not delete transaction");

        assert_eq!(deleted.amount, 4000);
        assert_eq!(balance_of(&connection), 10_000);
    }

    #[test]
    fn insufficient_funds_rejects_and_leaves_state_unchanged() {
        let (connection, wallet_id, activity_type_id) = setup(3000);

        let result = create_transaction(UID, activity_type_id, 5000, None, &connection);

        assert_eq!(
            result,
            Err(Error::InsufficientFunds {
                current: 3000,
                required: 5000,
            })
        );
        assert_eq!(balance_of(&connection), 3000);
        assert!(
            get_transactions_for_wallet(wallet_id, 50, &connection)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        let (connection, _, activity_type_id) = setup(10_000);

        assert_eq!(
            create_transaction(UID, activity_type_id, 0, None, &connection),
            Err(Error::InvalidAmount)
        );
        assert_eq!(
            create_transaction(UID, activity_type_id, -50, None, &connection),
            Err(Error::InvalidAmount)
        );
        assert_eq!(balance_of(&connection), 10_000);
    }

    #[test]
    fn unknown_activity_type_is_rejected() {
        let (connection, _, _) = setup(10_000);

        let result = create_transaction(UID, 999, 1000, None, &connection);

        assert_eq!(result, Err(Error::InvalidActivityType(Some(999))));
        assert_eq!(balance_of(&connection), 10_000);
    }

    #[test]
    fn missing_wallet_is_rejected() {
        let (connection, _, activity_type_id) = setup(10_000);

        let result = create_transaction("no-such-uid", activity_type_id, 1000, None, &connection);

        assert_eq!(result, Err(Error::WalletNotFound));
    }

    #[test]
    fn delete_rejects_other_users_transactions() {
        let (connection, _, activity_type_id) = setup(10_000);
        let transaction = create_transaction(UID, activity_type_id, 1000, None, &connection).unwrap();

        let other_email = Email::new("other@example.com").unwrap();
        ensure_wallet("other-uid", &other_email, "user", None, &connection).unwrap();

        let result = delete_transaction("other-uid", transaction.id, &connection);

        assert_eq!(result, Err(Error::NotOwner));
        // The transaction survives and the owner's balance is untouched.
        assert_eq!(balance_of(&connection), 9000);
    }

    #[test]
    fn delete_missing_transaction_is_rejected() {
        let (connection, _, _) = setup(0);

        assert_eq!(
            delete_transaction(UID, 999, &connection),
            Err(Error::TransactionNotFound)
        );
    }

    #[test]
    fn history_is_newest_first_and_respects_limit() {
        let (connection, wallet_id, activity_type_id) = setup(10_000);

        let first = create_transaction(UID, activity_type_id, 100, Some("first"), &connection).unwrap();
        let second = create_transaction(UID, activity_type_id, 200, Some("second"), &connection).unwrap();
        let third = create_transaction(UID, activity_type_id, 300, Some("third"), &connection).unwrap();

        let history = get_transactions_for_wallet(wallet_id, 50, &connection).unwrap();
        let ids: Vec<i64> = history.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
        assert_eq!(history[0].activity_type.name, "Groceries");

        let capped = get_transactions_for_wallet(wallet_id, 2, &connection).unwrap();
        assert_eq!(capped.len(), 2);
    }
}

#[cfg(test)]
mod concurrency_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use crate::{
        Error,
        activity_type::create_activity_type,
        db::initialize,
        transaction::create_transaction,
        user::Email,
        wallet::{add_funds, ensure_wallet, get_wallet_by_uid},
    };

    #[test]
    fn concurrent_debits_never_overdraw() {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).expect("Could not initialize database");

        let email = Email::new("foo@bar.baz").unwrap();
        ensure_wallet("test-uid", &email, "user", None, &connection).unwrap();
        add_funds("test-uid", 5000, &connection).unwrap();
        let activity_type = create_activity_type("Groceries", None, None, &connection).unwrap();

        let shared = Arc::new(Mutex::new(connection));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let shared = shared.clone();
                let activity_type_id = activity_type.id;

                std::thread::spawn(move || {
                    let connection = shared.lock().unwrap();
                    create_transaction("test-uid", activity_type_id, 3000, None, &connection)
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let successes = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(successes, 1, "exactly one debit must win: {results:?}");
        assert!(results.iter().any(|result| matches!(
            result,
            Err(Error::InsufficientFunds {
                current: 2000,
                required: 3000,
            })
        )));

        let connection = shared.lock().unwrap();
        assert_eq!(get_wallet_by_uid("test-uid", &connection).unwrap().balance, 2000);
    }
}
