//! Tunnel data plane: per-database listeners and the byte splice.

mod listener;
mod splice;

pub use listener::{ListenerStats, TunnelListener, ERROR_PREFIX};
pub use splice::splice;
