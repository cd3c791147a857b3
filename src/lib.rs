//! Nexus realtime core.
//!
//! Library surface behind the `nexusd` binary: the in-process integration
//! tests drive the service layer through these modules.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod net;
pub mod perms;
pub mod security;
pub mod services;
pub mod state;
pub mod store;

pub use config::Config;
pub use state::Hub;
pub use store::Store;
