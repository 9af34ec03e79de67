//! RESP type tags and line terminator.

/// Simple string tag (`+OK`).
pub const SIMPLE_STRING: u8 = b'+';

/// Simple error tag (`-ERR ...`).
pub const SIMPLE_ERROR: u8 = b'-';

/// Bulk (length-prefixed, binary-safe) string tag.
pub const BULK_STRING: u8 = b'$';

/// Array header tag.
pub const ARRAY: u8 = b'*';

/// Line terminator.
pub const EOL: &[u8; 2] = b"\r\n";
