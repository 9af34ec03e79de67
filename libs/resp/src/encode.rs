//! Frame encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::token;

/// An encodable RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Length-prefixed, binary-safe string.
    BulkString(Bytes),
    /// Single-line status string.
    SimpleString(String),
    /// Single-line error string.
    SimpleError(String),
    /// Ordered sequence of frames.
    Array(Vec<Frame>),
}

impl Frame {
    /// Build a bulk string frame.
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Frame::BulkString(value.into())
    }

    /// Build an array of bulk strings, the shape of every Redis command.
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(Frame::bulk).collect())
    }

    /// Append this frame's wire encoding to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::BulkString(value) => {
                put_header(buf, token::BULK_STRING, value.len());
                buf.put_slice(value);
                buf.put_slice(token::EOL);
            }
            Frame::SimpleString(text) => put_line(buf, token::SIMPLE_STRING, text),
            Frame::SimpleError(text) => put_line(buf, token::SIMPLE_ERROR, text),
            Frame::Array(items) => {
                put_header(buf, token::ARRAY, items.len());
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    /// Encode this frame into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// A sequence of frames sent in a single write.
///
/// Used to pipeline an optional `AUTH` ahead of the actual request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    frames: Vec<Frame>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to the command.
    pub fn push(&mut self, frame: Frame) -> &mut Self {
        self.frames.push(frame);
        self
    }

    /// Number of frames in the command.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Concatenated encoding of every frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for frame in &self.frames {
            frame.encode(&mut buf);
        }
        buf.freeze()
    }
}

fn put_header(buf: &mut BytesMut, tag: u8, len: usize) {
    buf.put_u8(tag);
    buf.put_slice(len.to_string().as_bytes());
    buf.put_slice(token::EOL);
}

/// Simple strings cannot carry line breaks; they are flattened to spaces.
fn put_line(buf: &mut BytesMut, tag: u8, text: &str) {
    buf.put_u8(tag);
    for byte in text.bytes() {
        buf.put_u8(if byte == b'\r' || byte == b'\n' { b' ' } else { byte });
    }
    buf.put_slice(token::EOL);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_command_encoding() {
        let mut cmd = Command::new();
        cmd.push(Frame::command(["auth", "password"]));

        assert_eq!(
            cmd.encode(),
            Bytes::from_static(b"*2\r\n$4\r\nauth\r\n$8\r\npassword\r\n")
        );
    }

    #[test]
    fn test_command_concatenates_frames() {
        let mut cmd = Command::new();
        cmd.push(Frame::command(["auth", "pw"]))
            .push(Frame::command(["sentinel", "get-master-addr-by-name", "mymaster"]));

        assert_eq!(cmd.len(), 2);
        assert_eq!(
            &cmd.encode()[..],
            &b"*2\r\n$4\r\nauth\r\n$2\r\npw\r\n\
               *3\r\n$8\r\nsentinel\r\n$23\r\nget-master-addr-by-name\r\n$8\r\nmymaster\r\n"[..]
        );
    }

    #[test]
    fn test_empty_command_encodes_nothing() {
        let cmd = Command::new();
        assert!(cmd.is_empty());
        assert!(cmd.encode().is_empty());
    }

    #[test]
    fn test_simple_error_encoding() {
        let frame = Frame::SimpleError("Testing Simple Error".to_string());
        assert_eq!(&frame.to_bytes()[..], b"-Testing Simple Error\r\n");
    }

    #[test]
    fn test_simple_string_encoding() {
        let frame = Frame::SimpleString("Testing Simple String".to_string());
        assert_eq!(&frame.to_bytes()[..], b"+Testing Simple String\r\n");
    }

    #[test]
    fn test_simple_error_flattens_line_breaks() {
        let frame = Frame::SimpleError("ERR line one\r\nline two".to_string());
        assert_eq!(&frame.to_bytes()[..], b"-ERR line one  line two\r\n");
    }

    #[test]
    fn test_bulk_string_is_binary_safe() {
        let frame = Frame::bulk(&b"a\r\nb\0"[..]);
        assert_eq!(&frame.to_bytes()[..], b"$5\r\na\r\nb\0\r\n");

        let empty = Frame::bulk(&b""[..]);
        assert_eq!(&empty.to_bytes()[..], b"$0\r\n\r\n");
    }

    #[test]
    fn test_nested_array_encoding() {
        let frame = Frame::Array(vec![Frame::Array(vec![]), Frame::bulk("x")]);
        assert_eq!(&frame.to_bytes()[..], b"*2\r\n*0\r\n$1\r\nx\r\n");
    }
}
