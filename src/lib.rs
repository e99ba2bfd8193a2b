//! imgvault - minimal bearer-token image hosting API.
//!
//! Library target so the integration tests in `tests/` can exercise the
//! handlers, store and auth extractors.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod store;

use config::Config;
use store::postgres::PgStore;

/// Shared application state passed to handlers and extractors.
pub struct AppState {
    pub db: PgStore,
    pub config: Config,
}
