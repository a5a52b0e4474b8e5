//! Session management: models, orchestration and errors.

pub mod error;
pub mod models;
pub mod service;

pub use error::{SessionError, SessionResult};
pub use models::{
    DeleteOutcome, ManagerState, Profile, RestoreSnapshotOptions, Session, SessionBackend,
    SessionRoute, SessionStatus, Snapshot, SnapshotBackend, StartSessionOptions, User,
};
pub use service::{SessionService, SessionServiceConfig, WindsurfProfile};
