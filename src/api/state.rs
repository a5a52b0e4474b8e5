//! Shared application state for the session manager API.

use std::sync::Arc;

use crate::session::SessionService;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    /// Token gating the admin-only tools.
    pub admin_token: String,
}
