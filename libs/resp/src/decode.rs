//! Reply decoding.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::RespError;
use crate::token;

/// Longest header or simple-string line accepted, excluding the terminator.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest bulk string payload accepted (Redis' own `proto-max-bulk-len`).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A simple string other than the `+OK` acknowledgment.
    SimpleString(String),
    /// A simple error; the payload is the error text without the tag.
    SimpleError(String),
    /// An array of bulk strings.
    Array(Vec<Bytes>),
}

/// Reads replies from a buffered byte stream, one reply per call.
#[derive(Debug)]
pub struct ReplyReader<R> {
    reader: R,
    line: Vec<u8>,
    acks: usize,
}

impl<R> ReplyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(64),
            acks: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Number of `+OK` lines skipped by the last [`read_reply`](Self::read_reply).
    pub fn acks_skipped(&self) -> usize {
        self.acks
    }

    /// Read one logical reply.
    ///
    /// `+OK` lines (for instance the acknowledgment of a pipelined `AUTH`) are
    /// skipped, so a single call may consume more than one line.
    pub async fn read_reply(&mut self) -> Result<Reply, RespError> {
        self.acks = 0;
        loop {
            let line = self.read_line().await?;

            match line[0] {
                token::SIMPLE_STRING => {
                    if &line[1..] == b"OK" {
                        self.acks += 1;
                        continue;
                    }
                    return Ok(Reply::SimpleString(lossy(&line[1..])));
                }
                token::SIMPLE_ERROR => return Ok(Reply::SimpleError(lossy(&line[1..]))),
                token::ARRAY => {
                    let len = parse_len(&line[1..]).ok_or_else(|| {
                        RespError::InvalidResponse(format!("bad array header: {:?}", lossy(line)))
                    })?;

                    if len == -1 {
                        return Err(RespError::NullRequest);
                    }
                    let len = usize::try_from(len).map_err(|_| {
                        RespError::InvalidResponse(format!("bad array length: {len}"))
                    })?;

                    let mut items = Vec::with_capacity(len.min(16));
                    for _ in 0..len {
                        items.push(self.read_bulk().await?);
                    }
                    return Ok(Reply::Array(items));
                }
                _ => {
                    return Err(RespError::InvalidResponse(format!(
                        "expected array header: {:?}",
                        lossy(line)
                    )))
                }
            }
        }
    }

    /// Read a bulk string header and its payload.
    async fn read_bulk(&mut self) -> Result<Bytes, RespError> {
        let header = self.read_line().await?;
        if header[0] != token::BULK_STRING {
            return Err(RespError::InvalidResponse(format!(
                "expected bulk string header: {:?}",
                lossy(header)
            )));
        }

        let len = parse_len(&header[1..])
            .and_then(|len| usize::try_from(len).ok())
            .filter(|len| *len <= MAX_BULK_LEN)
            .ok_or_else(|| {
                RespError::InvalidResponse(format!("bad bulk string header: {:?}", lossy(header)))
            })?;

        // Payload plus its terminator; grown as data arrives rather than
        // trusting the declared length for the allocation.
        let want = len + token::EOL.len();
        let mut payload = Vec::with_capacity(want.min(MAX_LINE_LEN));
        (&mut self.reader)
            .take(want as u64)
            .read_to_end(&mut payload)
            .await
            .map_err(RespError::ReadFailed)?;

        if payload.len() < want {
            // A CRLF-terminated payload shorter than declared is a framing
            // error; anything else is a connection cut mid-payload.
            if payload.ends_with(token::EOL) {
                return Err(RespError::WrongBulkSize { expected: len });
            }
            return Err(RespError::eof());
        }
        if &payload[len..] != token::EOL {
            return Err(RespError::WrongBulkSize { expected: len });
        }

        payload.truncate(len);
        Ok(Bytes::from(payload))
    }

    /// Read one line into the reusable buffer, stripping the terminator.
    /// Empty lines are errors.
    async fn read_line(&mut self) -> Result<&[u8], RespError> {
        self.line.clear();
        let limit = (MAX_LINE_LEN + token::EOL.len()) as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(RespError::ReadFailed)?;

        if n == 0 {
            return Err(RespError::eof());
        }
        if self.line.last() != Some(&b'\n') {
            if n as u64 >= limit {
                return Err(RespError::InvalidResponse("line too long".to_string()));
            }
            return Err(RespError::eof());
        }

        self.line.pop();
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        if self.line.is_empty() {
            return Err(RespError::empty_line());
        }

        Ok(&self.line)
    }
}

fn parse_len(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn lossy(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
