//! Pocketbook is a REST API server for tracking personal spending.
//!
//! Accounts authenticate passwordlessly with one-time codes sent by email.
//! Each account owns a wallet whose balance is debited by categorized expense
//! transactions, with per-category stats and a downloadable CSV statement.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

mod activity_type;
mod app_state;
mod auth;
mod db;
mod email;
mod endpoints;
mod error;
mod export;
mod logging;
mod otp;
mod routing;
mod transaction;
mod user;
mod wallet;

pub use app_state::AppState;
pub use db::initialize as initialize_db;
pub use email::{LogMailer, Mailer};
pub use error::Error;
pub use logging::logging_middleware;
pub use otp::{InMemoryOtpStore, OtpStore};
pub use routing::build_router;

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
