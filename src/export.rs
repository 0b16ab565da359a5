//! This file implements the downloadable account statement.
//!
//! The statement is rendered as CSV so it opens directly in spreadsheet
//! tools. Rows run oldest to newest and carry the wallet balance as it stood
//! after each expense, reconstructed backwards from the current balance.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Claims,
    db::acquire,
    transaction::{TransactionWithActivityType, get_transactions_for_wallet},
    wallet::{Wallet, WalletState, get_wallet_by_uid},
};

const STATEMENT_LIMIT: u32 = 10_000;

/// One line of an account statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRow {
    /// When the expense was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    /// The expense's category name.
    pub activity_type: String,
    /// The free-form note, empty when none was given.
    pub note: String,
    /// The debited amount in minor units.
    pub amount: i64,
    /// The wallet balance just after this expense.
    pub balance_after: i64,
}

/// A full account statement for one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// The wallet the statement belongs to.
    pub wallet: Wallet,
    /// The statement lines, oldest first.
    pub rows: Vec<StatementRow>,
    /// The sum of all listed debits.
    pub total_spent: i64,
}

/// Assemble the statement for the wallet owned by `user_uid`.
///
/// # Errors
/// This function will return an [Error::WalletNotFound] if the account has no
/// wallet, or an error if there is an SQL error.
pub fn build_statement(user_uid: &str, connection: &Connection) -> Result<Statement, Error> {
    let wallet = get_wallet_by_uid(user_uid, connection)?;
    let history = get_transactions_for_wallet(wallet.id, STATEMENT_LIMIT, connection)?;

    // The history is newest first. Walking it in that order, the balance
    // after each expense is the balance before the next newer one.
    let mut running = wallet.balance;
    let mut rows: Vec<StatementRow> = history
        .iter()
        .map(|entry| {
            let row = to_row(entry, running);
            running += entry.amount;
            row
        })
        .collect();
    rows.reverse();

    let total_spent = rows.iter().map(|row| row.amount).sum();

    Ok(Statement {
        wallet,
        rows,
        total_spent,
    })
}

fn to_row(entry: &TransactionWithActivityType, balance_after: i64) -> StatementRow {
    StatementRow {
        date: entry.created_at,
        activity_type: entry.activity_type.name.clone(),
        note: entry.note.clone().unwrap_or_default(),
        amount: entry.amount,
        balance_after,
    }
}

/// Render `statement` as CSV.
///
/// # Errors
/// This function will return an [Error::StatementError] if serialization
/// fails.
pub fn write_csv(statement: &Statement) -> Result<Vec<u8>, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for row in &statement.rows {
        writer
            .serialize(row)
            .map_err(|error| Error::StatementError(error.to_string()))?;
    }

    writer
        .write_record([
            "",
            "TOTAL",
            "",
            &statement.total_spent.to_string(),
            &statement.wallet.balance.to_string(),
        ])
        .map_err(|error| Error::StatementError(error.to_string()))?;

    writer
        .into_inner()
        .map_err(|error| Error::StatementError(error.to_string()))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// A route handler for downloading the caller's statement as a CSV
/// attachment.
pub async fn export_statement_endpoint(
    State(state): State<WalletState>,
    claims: Claims,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let statement = build_statement(&claims.sub, &connection)?;
    let body = write_csv(&statement)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"statement.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod statement_tests {
    use rusqlite::Connection;

    use crate::{
        activity_type::create_activity_type,
        db::initialize,
        export::{build_statement, write_csv},
        transaction::create_transaction,
        user::Email,
        wallet::{add_funds, ensure_wallet},
    };

    const UID: &str = "test-uid";

    fn setup() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).expect("Could not initialize database");

        let email = Email::new("foo@bar.baz").unwrap();
        ensure_wallet(UID, &email, "user", None, &connection).unwrap();
        add_funds(UID, 10_000, &connection).unwrap();

        connection
    }

    #[test]
    fn rows_run_oldest_first_with_running_balance() {
        let connection = setup();
        let groceries = create_activity_type("Groceries", None, None, &connection).unwrap();
        let transport = create_activity_type("Transport", None, None, &connection).unwrap();

        create_transaction(UID, groceries.id, 4000, Some("weekly shop"), &connection).unwrap();
        create_transaction(UID, transport.id, 1500, None, &connection).unwrap();

        let statement = build_statement(UID, &connection).unwrap();

        assert_eq!(statement.total_spent, 5500);
        assert_eq!(statement.wallet.balance, 4500);

        assert_eq!(statement.rows.len(), 2);
        assert_eq!(statement.rows[0].activity_type, "Groceries");
        assert_eq!(statement.rows[0].balance_after, 6000);
        assert_eq!(statement.rows[1].activity_type, "Transport");
        assert_eq!(statement.rows[1].balance_after, 4500);
    }

    #[test]
    fn empty_wallet_yields_empty_statement() {
        let connection = setup();

        let statement = build_statement(UID, &connection).unwrap();

        assert!(statement.rows.is_empty());
        assert_eq!(statement.total_spent, 0);
    }

    #[test]
    fn csv_includes_header_and_rows() {
        let connection = setup();
        let groceries = create_activity_type("Groceries", None, None, &connection).unwrap();
        create_transaction(UID, groceries.id, 4000, Some("weekly shop"), &connection).unwrap();

        let statement = build_statement(UID, &connection).unwrap();
        let bytes = write_csv(&statement).expect("Could not write CSV");
        let text = String::from_utf8(bytes).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("date,activity_type,note,amount,balance_after")
        );

        let row = lines.next().expect("want one data row");
        assert!(row.contains("Groceries"), "row was: {row}");
        assert!(row.contains("4000"), "row was: {row}");
        assert!(row.contains("6000"), "row was: {row}");

        let totals = lines.next().expect("want a totals row");
        assert!(totals.contains("TOTAL"), "totals row was: {totals}");
        assert!(totals.contains("4000"), "totals row was: {totals}");
    }
}
