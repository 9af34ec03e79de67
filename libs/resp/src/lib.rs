//! Minimal RESP (Redis serialization protocol) codec.
//!
//! Covers the subset a sentinel tunnel needs:
//! - Encoding command frames (arrays of bulk strings) for `AUTH` and
//!   `SENTINEL get-master-addr-by-name`
//! - Encoding simple strings and simple errors, used to report tunnel
//!   failures to clients in a form their Redis client library understands
//! - Decoding sentinel replies (arrays of bulk strings, simple errors, and
//!   the `+OK` acknowledgment of `AUTH`)
//!
//! Wire format reference: <https://redis.io/docs/reference/protocol-spec/>

mod decode;
mod encode;
mod error;
pub mod token;

pub use decode::{Reply, ReplyReader, MAX_LINE_LEN};
pub use encode::{Command, Frame};
pub use error::RespError;
