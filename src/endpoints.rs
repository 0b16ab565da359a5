//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/transactions/{transaction_id}',
//! use [format_endpoint].

/// The route to request a cup of coffee (experimental).
pub const COFFEE: &str = "/api/coffee";

/// The route to start a registration by mailing a confirmation code.
pub const SEND_CONFIRMATION: &str = "/api/auth/send-confirmation";
/// The route to complete a registration, creating the account and wallet.
pub const CONFIRM_ACCOUNT: &str = "/api/auth/confirm";
/// The route to start a log-in by mailing a verification code.
pub const LOG_IN: &str = "/api/auth/login";
/// The route to complete a log-in, yielding a session token.
pub const VERIFY_OTP: &str = "/api/auth/verify-otp";
/// The route to reissue a verification code.
pub const RESEND_OTP: &str = "/api/auth/resend-otp";

/// The route to credit the caller's wallet.
pub const ADD_FUNDS: &str = "/api/wallet/add-funds";
/// The route to the caller's wallet with its recent transactions.
pub const WALLET: &str = "/api/wallet/me";
/// The route to the caller's balance overview (GET) or a balance reset (DELETE).
pub const WALLET_BALANCE: &str = "/api/wallet/balance";
/// The route to the caller's transaction history.
pub const WALLET_TRANSACTIONS: &str = "/api/wallet/transactions";

/// The route to record an expense.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to a single transaction.
pub const TRANSACTION: &str = "/api/transactions/{transaction_id}";
/// The route to download the caller's statement.
pub const EXPORT_STATEMENT: &str = "/api/transactions/export";

/// The route to list (GET) or create (POST) activity types.
pub const ACTIVITY_TYPES: &str = "/api/activity-types";
/// The route to a single activity type.
pub const ACTIVITY_TYPE: &str = "/api/activity-types/{activity_type_id}";
/// The route to search activity types by name or description.
pub const ACTIVITY_TYPE_SEARCH: &str = "/api/activity-types/search";
/// The route to the caller's per-category spending stats.
pub const ACTIVITY_TYPE_STATS: &str = "/api/activity-types/my-stats";
/// The route to the caller's most used activity types.
pub const ACTIVITY_TYPE_MOST_USED: &str = "/api/activity-types/most-used";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/api/transactions/{transaction_id}',
/// '{transaction_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII characters
/// and a single parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let mut param_start = None;
    let mut param_end = None;

    for (i, c) in endpoint_path.chars().enumerate() {
        if c == '{' {
            param_start = Some(i);
        } else if param_start.is_some() && c == '}' {
            param_end = Some(i + 1);
            break;
        }
    }

    let param_start = match param_start {
        Some(start) => start,
        None => return endpoint_path.to_string(),
    };

    let param_end = param_end.unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}
