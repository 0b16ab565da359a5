//! This file defines the `Wallet` type, its queries and the API routes for
//! funding and inspecting the caller's wallet.
//!
//! Each account owns exactly one wallet. Balances are stored as integer
//! minor units (e.g., cents) so arithmetic stays exact.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, Query, State},
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    auth::Claims,
    db::acquire,
    transaction::get_transactions_for_wallet,
    user::Email,
};

pub type WalletId = i64;

/// A user's wallet holding their spendable balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// The ID of the wallet.
    pub id: WalletId,
    /// The uid of the owning account.
    pub user_uid: String,
    /// The owner's email address.
    pub email: Email,
    /// The owner's role claim at wallet creation.
    pub role: String,
    /// A display name for the wallet.
    pub name: Option<String>,
    /// The current balance in minor units. Never negative.
    pub balance: i64,
    /// When the wallet was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the balance last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A wallet overview with spending aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    /// The current balance in minor units.
    pub balance: i64,
    /// The sum of all recorded debits.
    pub total_spent: i64,
    /// How many transactions the wallet has recorded.
    pub transaction_count: i64,
    /// The owner's email address.
    pub email: Email,
}

pub fn create_wallet_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS wallet (
            id INTEGER PRIMARY KEY,
            user_uid TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            name TEXT,
            balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_wallet_user_uid ON wallet(user_uid);",
    )?;

    Ok(())
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Fetch the wallet owned by `user_uid`, creating an empty one first if the
/// account has none.
///
/// Calling this twice returns the same wallet, so account confirmation can
/// be retried safely.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn ensure_wallet(
    user_uid: &str,
    email: &Email,
    role: &str,
    name: Option<&str>,
    connection: &Connection,
) -> Result<Wallet, Error> {
    let now = OffsetDateTime::now_utc();
    let default_name = format!("{}'s wallet", email.local_part());
    let name = name.unwrap_or(&default_name);

    connection.execute(
        "INSERT INTO wallet (user_uid, email, role, name, balance, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
         ON CONFLICT(user_uid) DO NOTHING;",
        (user_uid, email.as_ref(), role, name, now),
    )?;

    get_wallet_by_uid(user_uid, connection)
}

/// Retrieve the wallet owned by `user_uid`.
///
/// # Errors
/// This function will return an [Error::WalletNotFound] if the account has no
/// wallet, or an error if there is an SQL error.
pub fn get_wallet_by_uid(user_uid: &str, connection: &Connection) -> Result<Wallet, Error> {
    connection
        .prepare(
            "SELECT id, user_uid, email, role, name, balance, created_at, updated_at
             FROM wallet WHERE user_uid = :uid;",
        )?
        .query_row(&[(":uid", user_uid)], map_row)
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::WalletNotFound,
            error => error.into(),
        })
}

/// Credit `amount` minor units to the wallet owned by `user_uid` and return
/// the new balance.
///
/// # Errors
/// This function will return an [Error::InvalidAmount] if `amount` is zero or
/// negative, an [Error::WalletNotFound] if the account has no wallet, or an
/// error if there is an SQL error.
pub fn add_funds(user_uid: &str, amount: i64, connection: &Connection) -> Result<i64, Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }

    connection
        .prepare(
            "UPDATE wallet SET balance = balance + :amount, updated_at = :now
             WHERE user_uid = :uid
             RETURNING balance;",
        )?
        .query_row(
            rusqlite::named_params! {
                ":amount": amount,
                ":now": OffsetDateTime::now_utc(),
                ":uid": user_uid,
            },
            |row| row.get(0),
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::WalletNotFound,
            error => error.into(),
        })
}

/// Retrieve the balance overview for the wallet owned by `user_uid`.
///
/// # Errors
/// This function will return an [Error::WalletNotFound] if the account has no
/// wallet, or an error if there is an SQL error.
pub fn get_balance_summary(
    user_uid: &str,
    connection: &Connection,
) -> Result<BalanceSummary, Error> {
    connection
        .prepare(
            "SELECT w.balance, COALESCE(SUM(t.amount), 0), COUNT(t.id), w.email
             FROM wallet w
             LEFT JOIN wallet_transaction t ON t.wallet_id = w.id
             WHERE w.user_uid = :uid
             GROUP BY w.id, w.balance, w.email;",
        )?
        .query_row(&[(":uid", user_uid)], |row| {
            let raw_email: String = row.get(3)?;

            Ok(BalanceSummary {
                balance: row.get(0)?,
                total_spent: row.get(1)?,
                transaction_count: row.get(2)?,
                email: Email::new_unchecked(&raw_email),
            })
        })
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::WalletNotFound,
            error => error.into(),
        })
}

/// Reset the balance of the wallet owned by `user_uid` to zero, keeping the
/// wallet row and its transaction history.
///
/// Returns the balance that was discarded.
///
/// # Errors
/// This function will return an [Error::WalletNotFound] if the account has no
/// wallet, an [Error::BalanceAlreadyEmpty] if the balance is already zero, or
/// an error if there is an SQL error.
pub fn reset_balance(user_uid: &str, connection: &Connection) -> Result<i64, Error> {
    let sql_transaction = rusqlite::Transaction::new_unchecked(
        connection,
        TransactionBehavior::Immediate,
    )?;

    let balance: i64 = sql_transaction
        .prepare("SELECT balance FROM wallet WHERE user_uid = :uid;")?
        .query_row(&[(":uid", user_uid)], |row| row.get(0))
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::WalletNotFound,
            error => error.into(),
        })?;

    if balance == 0 {
        return Err(Error::BalanceAlreadyEmpty);
    }

    sql_transaction.execute(
        "UPDATE wallet SET balance = 0, updated_at = ?1 WHERE user_uid = ?2;",
        (OffsetDateTime::now_utc(), user_uid),
    )?;

    sql_transaction.commit()?;

    Ok(balance)
}

fn map_row(row: &Row) -> Result<Wallet, rusqlite::Error> {
    let raw_email: String = row.get(2)?;

    Ok(Wallet {
        id: row.get(0)?,
        user_uid: row.get(1)?,
        email: Email::new_unchecked(&raw_email),
        role: row.get(3)?,
        name: row.get(4)?,
        balance: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The state needed for the wallet endpoints.
#[derive(Clone)]
pub struct WalletState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for WalletState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The payload for crediting a wallet.
#[derive(Debug, Serialize, Deserialize)]
pub struct AddFundsData {
    /// The amount to credit, in minor units. Must be positive.
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// The maximum number of transactions to return.
    pub limit: Option<u32>,
}

const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// A route handler for crediting the caller's wallet.
pub async fn add_funds_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
    Json(data): Json<AddFundsData>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let new_balance = add_funds(&claims.sub, data.amount, &connection)?;

    Ok(Json(json!({
        "success": true,
        "message": "funds added",
        "data": { "new_balance": new_balance },
    }))
    .into_response())
}

/// A route handler for the caller's wallet with its recent transactions.
pub async fn get_my_wallet_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let wallet = get_wallet_by_uid(&claims.sub, &connection)?;
    let transactions =
        get_transactions_for_wallet(wallet.id, DEFAULT_HISTORY_LIMIT, &connection)?;

    Ok(Json(json!({
        "success": true,
        "data": { "wallet": wallet, "transactions": transactions },
    }))
    .into_response())
}

/// A route handler for the caller's balance overview.
pub async fn get_balance_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let summary = get_balance_summary(&claims.sub, &connection)?;

    Ok(Json(json!({"success": true, "data": summary})).into_response())
}

/// A route handler for the caller's transaction history, newest first.
pub async fn get_history_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
    Query(params): Query<HistoryParams>,
) -> Result<Response, Error> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    let connection = acquire(&state.db_connection)?;
    let wallet = get_wallet_by_uid(&claims.sub, &connection)?;
    let transactions = get_transactions_for_wallet(wallet.id, limit, &connection)?;

    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "data": transactions,
    }))
    .into_response())
}

/// A route handler for resetting the caller's balance to zero.
///
/// The wallet row and its transaction history are preserved.
pub async fn reset_balance_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let discarded = reset_balance(&claims.sub, &connection)?;

    Ok(Json(json!({
        "success": true,
        "message": "balance reset to zero",
        "data": { "discarded": discarded },
    }))
    .into_response())
}
