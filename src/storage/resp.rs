/// RESP (Redis Serialization Protocol) framing for the remote KV backend

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n), `None` is the null bulk string
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...), `None` is the null array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn bulk<B: Into<Bytes>>(data: B) -> Self {
        RespValue::BulkString(Some(data.into()))
    }
}

/// RESP parser for reading replies
pub struct RespParser;

/// RESP encoder for writing commands
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),
}

impl RespParser {
    /// Parse one complete value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are
    /// needed; on success exactly the bytes of the value are consumed.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::decode(&buf[..])? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decode a value from a slice, returning it with the number of bytes used
    fn decode(data: &[u8]) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some(&first_byte) = data.first() else {
            return Ok(None);
        };

        let Some((line, mut consumed)) = Self::read_line(data) else {
            return Ok(None);
        };
        let body = &line[1..];

        let value = match first_byte {
            b'+' => RespValue::SimpleString(str::from_utf8(body)?.to_string()),
            b'-' => RespValue::Error(str::from_utf8(body)?.to_string()),
            b':' => RespValue::Integer(str::from_utf8(body)?.parse()?),
            b'$' => {
                let size: i64 = str::from_utf8(body)?.parse()?;
                if size == -1 {
                    RespValue::BulkString(None)
                } else if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid bulk string size".to_string(),
                    ));
                } else {
                    let size = size as usize;
                    let rest = &data[consumed..];
                    if rest.len() < size + 2 {
                        return Ok(None);
                    }
                    if &rest[size..size + 2] != b"\r\n" {
                        return Err(RespParseError::InvalidFormat(
                            "Missing \\r\\n after bulk string".to_string(),
                        ));
                    }
                    consumed += size + 2;
                    RespValue::BulkString(Some(Bytes::copy_from_slice(&rest[..size])))
                }
            }
            b'*' => {
                let size: i64 = str::from_utf8(body)?.parse()?;
                if size == -1 {
                    RespValue::Array(None)
                } else if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid array size".to_string(),
                    ));
                } else {
                    let mut elements = Vec::with_capacity(size as usize);
                    for _ in 0..size {
                        match Self::decode(&data[consumed..])? {
                            Some((element, used)) => {
                                consumed += used;
                                elements.push(element);
                            }
                            None => return Ok(None),
                        }
                    }
                    RespValue::Array(Some(elements))
                }
            }
            other => {
                return Err(RespParseError::InvalidFormat(format!(
                    "Unknown RESP type: {}",
                    other as char
                )))
            }
        };

        Ok(Some((value, consumed)))
    }

    /// Find a line ending with \r\n; returns the line without the
    /// terminator and the length including it
    fn read_line(data: &[u8]) -> Option<(&[u8], usize)> {
        data.windows(2)
            .position(|w| w == b"\r\n")
            .map(|i| (&data[..i], i + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        }
    }

    /// Build a command array from a name and binary-safe arguments
    pub fn create_command(command: &str, args: &[&[u8]]) -> RespValue {
        let mut elements = Vec::with_capacity(args.len() + 1);
        elements.push(RespValue::bulk(command.to_string()));
        for arg in args {
            elements.push(RespValue::bulk(Bytes::copy_from_slice(arg)));
        }
        RespValue::Array(Some(elements))
    }
}
