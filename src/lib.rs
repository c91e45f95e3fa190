//! Parley realtime chat server
//!
//! Cookie-authenticated REST API for accounts, direct messages, files and
//! groups, plus a WebSocket channel for live delivery, presence and typing.
//! The [`client`] module is a typed SDK for the same surface.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod files;
pub mod groups;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod rate_limit;
pub mod realtime;
pub mod server;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{ChatError, ChatResult};
