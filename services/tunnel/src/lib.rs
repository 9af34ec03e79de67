//! Redis Sentinel tunnel.
//!
//! Exposes each configured Redis database on a fixed local port. Every
//! accepted connection is proxied to the database's current master, looked
//! up through Sentinel just before dialing, so clients keep working across
//! failovers without knowing about Sentinel.
//!
//! ## Components
//!
//! - [`discovery`]: the single Sentinel connection with reconnect and retry,
//!   owned by a worker task that serializes queries.
//! - [`tunnel`]: per-database listeners and the byte splice.
//! - [`supervisor`]: runs listeners and the health server, stops on the first
//!   error or on shutdown.
//! - [`config`] and [`cli`]: flags, `ST_*` environment variables and YAML.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
mod shutdown;
pub mod supervisor;
pub mod tunnel;

pub use config::{Config, DatabaseRoute};
pub use error::{DiscoveryError, TunnelError};
pub use supervisor::Supervisor;
