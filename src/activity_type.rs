//! This file defines the `ActivityType` type, its queries and the API routes
//! for managing the expense category catalog.

use axum::{
    Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AppState, Error, auth::Claims, db::acquire};

pub type ActivityTypeId = i64;

/// An expense category, e.g., 'Groceries', 'Transport'.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityType {
    /// The ID of the activity type.
    pub id: ActivityTypeId,
    /// The unique name of the activity type.
    pub name: String,
    /// An optional longer description.
    pub description: Option<String>,
    /// An optional icon label for clients to render.
    pub icon: Option<String>,
}

/// An activity type along with how many transactions reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityTypeWithCount {
    /// The activity type.
    #[serde(flatten)]
    pub activity_type: ActivityType,
    /// How many transactions reference it, across all wallets.
    pub transaction_count: i64,
}

/// Per-category spending aggregates for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityTypeStats {
    /// The ID of the activity type.
    pub id: ActivityTypeId,
    /// The name of the activity type.
    pub name: String,
    /// The icon label, if any.
    pub icon: Option<String>,
    /// The user's total spend in this category.
    pub total_spent: i64,
    /// How many of the user's transactions fall in this category.
    pub transaction_count: i64,
    /// This category's share of the user's total spend, in percent.
    pub percentage: f64,
}

pub fn create_activity_type_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_type (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            icon TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_type_name ON activity_type(name);",
    )?;

    Ok(())
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create an activity type in the database.
///
/// # Errors
/// This function will return an [Error::EmptyActivityTypeName] if `name` is
/// blank, an [Error::DuplicateActivityTypeName] if the name is taken, or an
/// error if there is an SQL error.
pub fn create_activity_type(
    name: &str,
    description: Option<&str>,
    icon: Option<&str>,
    connection: &Connection,
) -> Result<ActivityType, Error> {
    let name = validate_name(name)?;

    if name_exists(&name, None, connection)? {
        return Err(Error::DuplicateActivityTypeName(name));
    }

    connection.execute(
        "INSERT INTO activity_type (name, description, icon) VALUES (?1, ?2, ?3);",
        (&name, description, icon),
    )?;

    let id = connection.last_insert_rowid();

    Ok(ActivityType {
        id,
        name,
        description: description.map(str::to_string),
        icon: icon.map(str::to_string),
    })
}

/// Retrieve the activity type with `id`.
///
/// # Errors
/// This function will return an [Error::NotFound] if `id` does not refer to
/// a valid activity type, or an error if there is an SQL error.
pub fn get_activity_type(
    id: ActivityTypeId,
    connection: &Connection,
) -> Result<ActivityType, Error> {
    connection
        .prepare("SELECT id, name, description, icon FROM activity_type WHERE id = :id;")?
        .query_row(&[(":id", &id)], map_row)
        .map_err(|error| error.into())
}

/// Retrieve all activity types ordered by name.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_all_activity_types(connection: &Connection) -> Result<Vec<ActivityType>, Error> {
    connection
        .prepare("SELECT id, name, description, icon FROM activity_type ORDER BY name ASC;")?
        .query_map([], map_row)?
        .map(|result| result.map_err(|error| error.into()))
        .collect()
}

/// Retrieve all activity types ordered by name, each with its transaction
/// count.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_all_with_counts(connection: &Connection) -> Result<Vec<ActivityTypeWithCount>, Error> {
    connection
        .prepare(
            "SELECT at.id, at.name, at.description, at.icon, COUNT(t.id)
             FROM activity_type at
             LEFT JOIN wallet_transaction t ON t.activity_type_id = at.id
             GROUP BY at.id, at.name, at.description, at.icon
             ORDER BY at.name ASC;",
        )?
        .query_map([], |row| {
            Ok(ActivityTypeWithCount {
                activity_type: map_row(row)?,
                transaction_count: row.get(4)?,
            })
        })?
        .map(|result| result.map_err(|error| error.into()))
        .collect()
}

/// Update an activity type's name, description and icon.
///
/// # Errors
/// This function will return an [Error::NotFound] if `id` does not refer to
/// a valid activity type, an [Error::DuplicateActivityTypeName] if the new
/// name belongs to another activity type, or an error if there is an SQL
/// error.
pub fn update_activity_type(
    id: ActivityTypeId,
    name: &str,
    description: Option<&str>,
    icon: Option<&str>,
    connection: &Connection,
) -> Result<ActivityType, Error> {
    // Fetching first distinguishes a missing row from a no-op update.
    get_activity_type(id, connection)?;

    let name = validate_name(name)?;

    if name_exists(&name, Some(id), connection)? {
        return Err(Error::DuplicateActivityTypeName(name));
    }

    connection.execute(
        "UPDATE activity_type SET name = ?1, description = ?2, icon = ?3 WHERE id = ?4;",
        (&name, description, icon, id),
    )?;

    Ok(ActivityType {
        id,
        name,
        description: description.map(str::to_string),
        icon: icon.map(str::to_string),
    })
}

/// Delete an activity type, refusing while transactions reference it.
///
/// # Errors
/// This function will return an [Error::NotFound] if `id` does not refer to
/// a valid activity type, an [Error::ActivityTypeInUse] carrying the number
/// of referencing transactions if there are any, or an error if there is an
/// SQL error.
pub fn delete_activity_type(id: ActivityTypeId, connection: &Connection) -> Result<(), Error> {
    get_activity_type(id, connection)?;

    let count: i64 = connection
        .prepare("SELECT COUNT(*) FROM wallet_transaction WHERE activity_type_id = :id;")?
        .query_row(&[(":id", &id)], |row| row.get(0))?;

    if count > 0 {
        return Err(Error::ActivityTypeInUse { count });
    }

    connection.execute("DELETE FROM activity_type WHERE id = ?1;", [id])?;

    Ok(())
}

/// Case-insensitively search activity types by name or description.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn search_activity_types(
    query: &str,
    connection: &Connection,
) -> Result<Vec<ActivityType>, Error> {
    let pattern = format!("%{}%", query.to_lowercase());

    connection
        .prepare(
            "SELECT id, name, description, icon FROM activity_type
             WHERE LOWER(name) LIKE :pattern
                OR LOWER(COALESCE(description, '')) LIKE :pattern
             ORDER BY name ASC;",
        )?
        .query_map(&[(":pattern", &pattern)], map_row)?
        .map(|result| result.map_err(|error| error.into()))
        .collect()
}

/// Per-category spend, count and percentage-of-total for the wallet owned by
/// `user_uid`, ordered by spend descending.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_stats_for_user(
    user_uid: &str,
    connection: &Connection,
) -> Result<Vec<ActivityTypeStats>, Error> {
    let rows: Vec<(ActivityTypeId, String, Option<String>, i64, i64)> = connection
        .prepare(
            "SELECT at.id, at.name, at.icon, COALESCE(SUM(t.amount), 0), COUNT(t.id)
             FROM activity_type at
             INNER JOIN wallet_transaction t ON t.activity_type_id = at.id
             INNER JOIN wallet w ON w.id = t.wallet_id
             WHERE w.user_uid = :uid
             GROUP BY at.id, at.name, at.icon
             ORDER BY COALESCE(SUM(t.amount), 0) DESC;",
        )?
        .query_map(&[(":uid", &user_uid)], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    let total_spent: i64 = rows.iter().map(|(_, _, _, spent, _)| spent).sum();

    Ok(rows
        .into_iter()
        .map(
            |(id, name, icon, spent, transaction_count)| ActivityTypeStats {
                id,
                name,
                icon,
                total_spent: spent,
                transaction_count,
                percentage: if total_spent > 0 {
                    (spent as f64 / total_spent as f64) * 100.0
                } else {
                    0.0
                },
            },
        )
        .collect())
}

/// The activity types most used by `user_uid`, ordered by transaction count
/// descending and capped at `limit`.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_most_used_by_user(
    user_uid: &str,
    limit: u32,
    connection: &Connection,
) -> Result<Vec<ActivityType>, Error> {
    connection
        .prepare(
            "SELECT at.id, at.name, at.description, at.icon
             FROM activity_type at
             INNER JOIN wallet_transaction t ON t.activity_type_id = at.id
             INNER JOIN wallet w ON w.id = t.wallet_id
             WHERE w.user_uid = :uid
             GROUP BY at.id, at.name, at.description, at.icon
             ORDER BY COUNT(t.id) DESC
             LIMIT :limit;",
        )?
        .query_map(
            rusqlite::named_params! {":uid": user_uid, ":limit": limit},
            map_row,
        )?
        .map(|result| result.map_err(|error| error.into()))
        .collect()
}

fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.trim();

    if name.is_empty() {
        Err(Error::EmptyActivityTypeName)
    } else {
        Ok(name.to_string())
    }
}

fn name_exists(
    name: &str,
    exclude_id: Option<ActivityTypeId>,
    connection: &Connection,
) -> Result<bool, Error> {
    let exists: bool = connection
        .prepare(
            "SELECT EXISTS (
                SELECT 1 FROM activity_type WHERE name = :name AND id IS NOT :exclude_id
             );",
        )?
        .query_row(
            rusqlite::named_params! {":name": name, ":exclude_id": exclude_id},
            |row| row.get(0),
        )?;

    Ok(exists)
}

fn map_row(row: &Row) -> Result<ActivityType, rusqlite::Error> {
    Ok(ActivityType {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        icon: row.get(3)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The state needed for the activity type endpoints.
#[derive(Clone)]
pub struct ActivityTypeState {
    /// The database connection.
    pub db_connection: std::sync::Arc<std::sync::Mutex<Connection>>,
}

impl FromRef<AppState> for ActivityTypeState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// The payload for creating or updating an activity type.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityTypeData {
    /// The unique name.
    pub name: String,
    /// An optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// An optional icon label.
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// When true, include per-type transaction counts.
    #[serde(default)]
    pub stats: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// The case-insensitive text to search for.
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct MostUsedParams {
    /// The maximum number of activity types to return.
    pub limit: Option<u32>,
}

const DEFAULT_MOST_USED_LIMIT: u32 = 5;

/// A route handler for creating a new activity type. Admin only.
pub async fn create_activity_type_endpoint(
    State(state): State<ActivityTypeState>,
    claims: Claims,
    Json(data): Json<ActivityTypeData>,
) -> Result<Response, Error> {
    claims.require_admin()?;

    let connection = acquire(&state.db_connection)?;
    let activity_type = create_activity_type(
        &data.name,
        data.description.as_deref(),
        data.icon.as_deref(),
        &connection,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "activity type created",
            "data": activity_type,
        })),
    )
        .into_response())
}

/// A route handler for listing activity types, optionally with counts.
pub async fn list_activity_types_endpoint(
    State(state): State<ActivityTypeState>,
    _claims: Claims,
    Query(params): Query<ListParams>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;

    let body = if params.stats {
        let activity_types = get_all_with_counts(&connection)?;
        json!({
            "success": true,
            "count": activity_types.len(),
            "data": activity_types,
        })
    } else {
        let activity_types = get_all_activity_types(&connection)?;
        json!({
            "success": true,
            "count": activity_types.len(),
            "data": activity_types,
        })
    };

    Ok(Json(body).into_response())
}

/// A route handler for getting an activity type by its database ID.
pub async fn get_activity_type_endpoint(
    State(state): State<ActivityTypeState>,
    _claims: Claims,
    Path(activity_type_id): Path<ActivityTypeId>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let activity_type = get_activity_type(activity_type_id, &connection)?;

    Ok(Json(json!({"success": true, "data": activity_type})).into_response())
}

/// A route handler for updating an activity type. Admin only.
pub async fn update_activity_type_endpoint(
    State(state): State<ActivityTypeState>,
    claims: Claims,
    Path(activity_type_id): Path<ActivityTypeId>,
    Json(data): Json<ActivityTypeData>,
) -> Result<Response, Error> {
    claims.require_admin()?;

    let connection = acquire(&state.db_connection)?;
    let activity_type = update_activity_type(
        activity_type_id,
        &data.name,
        data.description.as_deref(),
        data.icon.as_deref(),
        &connection,
    )?;

    Ok(Json(json!({
        "success": true,
        "message": "activity type updated",
        "data": activity_type,
    }))
    .into_response())
}

/// A route handler for deleting an activity type. Admin only.
///
/// Deletion is refused with the count of referencing transactions while any
/// transaction still uses the activity type.
pub async fn delete_activity_type_endpoint(
    State(state): State<ActivityTypeState>,
    claims: Claims,
    Path(activity_type_id): Path<ActivityTypeId>,
) -> Result<Response, Error> {
    claims.require_admin()?;

    let connection = acquire(&state.db_connection)?;
    delete_activity_type(activity_type_id, &connection)?;

    Ok(Json(json!({"success": true, "message": "activity type deleted"})).into_response())
}

/// A route handler for searching activity types by name or description.
pub async fn search_activity_types_endpoint(
    State(state): State<ActivityTypeState>,
    _claims: Claims,
    Query(params): Query<SearchParams>,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let activity_types = search_activity_types(&params.q, &connection)?;

    Ok(Json(json!({
        "success": true,
        "count": activity_types.len(),
        "data": activity_types,
    }))
    .into_response())
}

/// A route handler for the caller's per-category spending stats.
pub async fn get_my_stats_endpoint(
    State(state): State<ActivityTypeState>,
    claims: Claims,
) -> Result<Response, Error> {
    let connection = acquire(&state.db_connection)?;
    let stats = get_stats_for_user(&claims.sub, &connection)?;

    Ok(Json(json!({"success": true, "data": stats})).into_response())
}

/// A route handler for the caller's most used activity types.
pub async fn get_most_used_endpoint(
    State(state): State<ActivityTypeState>,
    claims: Claims,
    Query(params): Query<MostUsedParams>,
) -> Result<Response, Error> {
    let limit = params.limit.unwrap_or(DEFAULT_MOST_USED_LIMIT);

    let connection = acquire(&state.db_connection)?;
    let activity_types = get_most_used_by_user(&claims.sub, limit, &connection)?;

    Ok(Json(json!({"success": true, "data": activity_types})).into_response())
}

#[cfg(test)]
mod activity_type_query_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        activity_type::{
            create_activity_type, create_activity_type_table, delete_activity_type,
            get_activity_type, get_all_activity_types, get_all_with_counts,
            search_activity_types, update_activity_type,
        },
        db::initialize,
    };

    fn get_test_db_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).expect("Could not initialize database");
        connection
    }

    #[test]
    fn create_activity_type_succeeds() {
        let connection = get_test_db_connection();

        let activity_type =
            create_activity_type("Groceries", Some("Food shopping"), Some("🛒"), &connection)
                .expect("Could not create activity type");

        assert!(activity_type.id > 0);
        assert_eq!(activity_type.name, "Groceries");
        assert_eq!(activity_type.description.as_deref(), Some("Food shopping"));
    }

    #[test]
    fn create_fails_on_blank_name() {
        let connection = get_test_db_connection();

        let result = create_activity_type("  \t", None, None, &connection);

        assert_eq!(result, Err(Error::EmptyActivityTypeName));
    }

    #[test]
    fn create_fails_on_duplicate_name() {
        let connection = get_test_db_connection();
        create_activity_type("Transport", None, None, &connection).unwrap();

        let result = create_activity_type("Transport", None, None, &connection);

        assert_eq!(
            result,
            Err(Error::DuplicateActivityTypeName("Transport".to_string()))
        );
    }

    #[test]
    fn get_all_is_ordered_by_name() {
        let connection = get_test_db_connection();
        create_activity_type("Transport", None, None, &connection).unwrap();
        create_activity_type("Groceries", None, None, &connection).unwrap();

        let names: Vec<String> = get_all_activity_types(&connection)
            .unwrap()
            .into_iter()
            .map(|activity_type| activity_type.name)
            .collect();

        assert_eq!(names, vec!["Groceries", "Transport"]);
    }

    #[test]
    fn update_renames_and_checks_duplicates() {
        let connection = get_test_db_connection();
        let groceries = create_activity_type("Groceries", None, None, &connection).unwrap();
        create_activity_type("Transport", None, None, &connection).unwrap();

        // Keeping its own name is not a duplicate.
        let unchanged =
            update_activity_type(groceries.id, "Groceries", Some("Food"), None, &connection)
                .expect("Could not update activity type");
        assert_eq!(unchanged.description.as_deref(), Some("Food"));

        let result = update_activity_type(groceries.id, "Transport", None, None, &connection);
        assert_eq!(
            result,
            Err(Error::DuplicateActivityTypeName("Transport".to_string()))
        );
    }

    #[test]
    fn update_missing_returns_not_found() {
        let connection = get_test_db_connection();

        let result = update_activity_type(999, "Anything", None, None, &connection);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn delete_succeeds_when_unreferenced() {
        let connection = get_test_db_connection();
        let activity_type = create_activity_type("Groceries", None, None, &connection).unwrap();

        delete_activity_type(activity_type.id, &connection)
            .expect("Could not delete activity type");

        assert_eq!(
            get_activity_type(activity_type.id, &connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn search_matches_name_and_description_case_insensitively() {
        let connection = get_test_db_connection();
        create_activity_type("Groceries", Some("weekly food run"), None, &connection).unwrap();
        create_activity_type("Transport", None, None, &connection).unwrap();

        let by_name = search_activity_types("grocer", &connection).unwrap();
        assert_eq!(by_name.len(), 1);

        let by_description = search_activity_types("FOOD", &connection).unwrap();
        assert_eq!(by_description.len(), 1);

        let no_match = search_activity_types("rent", &connection).unwrap();
        assert!(no_match.is_empty());
    }

    #[test]
    fn counts_are_zero_without_transactions() {
        let connection = get_test_db_connection();
        create_activity_type("Groceries", None, None, &connection).unwrap();

        let with_counts = get_all_with_counts(&connection).unwrap();

        assert_eq!(with_counts.len(), 1);
        assert_eq!(with_counts[0].transaction_count, 0);
    }
}
