//! HTTP front end for the hubbub WebSub hub.
//!
//! Routes:
//! - `POST /hub` subscriber requests (form encoded `hub.*` fields)
//! - `POST /hub/publish?topic=` publisher notifications
//! - `GET /health`

pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use server::{AppState, HubServer, ServerBuilder, build_app, build_hub, spawn_failure_observer};
