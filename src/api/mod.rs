//! HTTP API for the session manager.

pub mod error;
pub mod routes;
pub mod state;
pub mod tools;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_app;
pub use state::AppState;
