//! Application router configuration.
//!
//! The authentication endpoints are open; everything else authenticates
//! through the [crate::auth::Claims] extractor, so a missing or invalid
//! bearer token is rejected before any handler body runs.

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;

use crate::{
    AppState,
    activity_type::{
        create_activity_type_endpoint, delete_activity_type_endpoint, get_activity_type_endpoint,
        get_most_used_endpoint, get_my_stats_endpoint, list_activity_types_endpoint,
        search_activity_types_endpoint, update_activity_type_endpoint,
    },
    auth::{
        confirm_account_endpoint, login_endpoint, resend_otp_endpoint,
        send_confirmation_endpoint, verify_otp_endpoint,
    },
    endpoints,
    export::export_statement_endpoint,
    logging::logging_middleware,
    transaction::{create_transaction_endpoint, delete_transaction_endpoint},
    wallet::{
        add_funds_endpoint, get_balance_endpoint, get_history_endpoint, get_my_wallet_endpoint,
        reset_balance_endpoint,
    },
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route(endpoints::SEND_CONFIRMATION, post(send_confirmation_endpoint))
        .route(endpoints::CONFIRM_ACCOUNT, post(confirm_account_endpoint))
        .route(endpoints::LOG_IN, post(login_endpoint))
        .route(endpoints::VERIFY_OTP, post(verify_otp_endpoint))
        .route(endpoints::RESEND_OTP, post(resend_otp_endpoint));

    let wallet_routes = Router::new()
        .route(endpoints::ADD_FUNDS, post(add_funds_endpoint))
        .route(endpoints::WALLET, get(get_my_wallet_endpoint))
        .route(
            endpoints::WALLET_BALANCE,
            get(get_balance_endpoint).delete(reset_balance_endpoint),
        )
        .route(endpoints::WALLET_TRANSACTIONS, get(get_history_endpoint));

    let transaction_routes = Router::new()
        .route(endpoints::TRANSACTIONS, post(create_transaction_endpoint))
        .route(endpoints::TRANSACTION, delete(delete_transaction_endpoint))
        .route(endpoints::EXPORT_STATEMENT, get(export_statement_endpoint));

    let activity_type_routes = Router::new()
        .route(
            endpoints::ACTIVITY_TYPES,
            get(list_activity_types_endpoint).post(create_activity_type_endpoint),
        )
        .route(endpoints::ACTIVITY_TYPE_SEARCH, get(search_activity_types_endpoint))
        .route(endpoints::ACTIVITY_TYPE_STATS, get(get_my_stats_endpoint))
        .route(endpoints::ACTIVITY_TYPE_MOST_USED, get(get_most_used_endpoint))
        .route(
            endpoints::ACTIVITY_TYPE,
            get(get_activity_type_endpoint)
                .put(update_activity_type_endpoint)
                .delete(delete_activity_type_endpoint),
        );

    Router::new()
        .route(endpoints::COFFEE, get(get_coffee))
        .merge(auth_routes)
        .merge(wallet_routes)
        .merge(transaction_routes)
        .merge(activity_type_routes)
        .fallback(get_404_not_found)
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Attempt to get a cup of coffee from the server.
async fn get_coffee() -> Response {
    (StatusCode::IM_A_TEAPOT, "I'm a teapot").into_response()
}

async fn get_404_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"success": false, "message": "not found"})),
    )
        .into_response()
}
