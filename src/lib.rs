pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod relay;
pub mod rooms;
pub mod routes;
pub mod session;
pub mod socket;
pub mod store;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::relay::ConnectionManager;
use crate::store::{CallLogStore, MessageStore};

/// Shared state behind the Socket.IO namespace and the REST surface.
pub struct AppState {
    pub config: AppConfig,
    pub manager: Arc<ConnectionManager>,
    pub messages: Arc<dyn MessageStore>,
    pub call_logs: Arc<dyn CallLogStore>,
}
