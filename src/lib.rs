//! Webtopd Library
//!
//! Core components for the ephemeral desktop session platform: the session
//! manager, the reverse proxy router, and the container backend they share.

pub mod api;
pub mod auth;
pub mod container;
pub mod router;
pub mod session;
pub mod store;
