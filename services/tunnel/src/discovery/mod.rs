//! Master discovery through Redis Sentinel.

mod connection;
mod worker;

pub use connection::{
    join_host_port, DiscoveryConfig, DiscoveryConnection, DIAL_TIMEOUT, REPLY_TIMEOUT,
};
pub use worker::{AddressResolver, DiscoveryHandle, DEFAULT_MAILBOX_CAPACITY};
