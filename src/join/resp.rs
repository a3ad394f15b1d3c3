//! RESP (Redis Serialization Protocol) codec for the remote join store
//!
//! Commands go out as arrays of bulk strings. Replies are decoded from a
//! read buffer that may hold a partial frame; nothing is consumed until a
//! whole value is available.

use bytes::{Buf, BytesMut};
use std::io::{self, Write};
use thiserror::Error;

/// RESP protocol errors
#[derive(Error, Debug)]
pub enum RespError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

pub type RespResult<T> = Result<T, RespError>;

/// RESP value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n, or $-1\r\n for null
    BulkString(Option<Vec<u8>>),
    /// *2\r\n...; a null array (*-1\r\n) decodes as [`RespValue::Null`]
    Array(Vec<RespValue>),
    /// _\r\n (RESP3)
    Null,
}

impl RespValue {
    /// A command frame
    pub fn command<I, A>(args: I) -> RespValue
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        RespValue::Array(
            args.into_iter()
                .map(|arg| RespValue::BulkString(Some(arg.as_ref().to_vec())))
                .collect(),
        )
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            RespValue::SimpleString(s) => write!(buf, "+{}\r\n", s)?,
            RespValue::Error(e) => write!(buf, "-{}\r\n", e)?,
            RespValue::Integer(i) => write!(buf, ":{}\r\n", i)?,
            RespValue::BulkString(None) => write!(buf, "$-1\r\n")?,
            RespValue::BulkString(Some(data)) => {
                write!(buf, "${}\r\n", data.len())?;
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(items) => {
                write!(buf, "*{}\r\n", items.len())?;
                for item in items {
                    item.encode(buf)?;
                }
            }
            RespValue::Null => write!(buf, "_\r\n")?,
        }
        Ok(())
    }

    /// Decode one value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the frame is not
    /// complete yet.
    pub fn decode(buf: &mut BytesMut) -> RespResult<Option<RespValue>> {
        match Self::parse(&buf[..], 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse(data: &[u8], start: usize) -> RespResult<Option<(RespValue, usize)>> {
        let Some((line, next)) = read_line(data, start) else {
            return Ok(None);
        };
        let Some((&kind, body)) = line.split_first() else {
            return Err(RespError::Protocol("empty line".to_string()));
        };

        match kind {
            b'+' => Ok(Some((RespValue::SimpleString(utf8(body)?), next))),
            b'-' => Ok(Some((RespValue::Error(utf8(body)?), next))),
            b':' => Ok(Some((RespValue::Integer(number(body)?), next))),
            b'_' => Ok(Some((RespValue::Null, next))),
            b'$' => {
                let len = number(body)?;
                if len < 0 {
                    return Ok(Some((RespValue::BulkString(None), next)));
                }
                let end = next + len as usize;
                if data.len() < end + 2 {
                    return Ok(None);
                }
                if &data[end..end + 2] != b"\r\n" {
                    return Err(RespError::Protocol(
                        "missing \\r\\n after bulk string".to_string(),
                    ));
                }
                Ok(Some((
                    RespValue::BulkString(Some(data[next..end].to_vec())),
                    end + 2,
                )))
            }
            b'*' => {
                let len = number(body)?;
                if len < 0 {
                    return Ok(Some((RespValue::Null, next)));
                }
                let mut items = Vec::with_capacity(len as usize);
                let mut position = next;
                for _ in 0..len {
                    match Self::parse(data, position)? {
                        Some((item, after)) => {
                            items.push(item);
                            position = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(items), position)))
            }
            other => Err(RespError::Protocol(format!(
                "unknown RESP type: {}",
                other as char
            ))),
        }
    }

    pub fn as_array(&self) -> RespResult<&[RespValue]> {
        match self {
            RespValue::Array(items) => Ok(items),
            other => Err(unexpected("array", other)),
        }
    }

    pub fn as_bulk_string(&self) -> RespResult<Option<&[u8]>> {
        match self {
            RespValue::BulkString(Some(data)) => Ok(Some(data)),
            RespValue::BulkString(None) | RespValue::Null => Ok(None),
            other => Err(unexpected("bulk string", other)),
        }
    }

    pub fn as_integer(&self) -> RespResult<i64> {
        match self {
            RespValue::Integer(i) => Ok(*i),
            other => Err(unexpected("integer", other)),
        }
    }
}

fn read_line(data: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = data.get(start..)?;
    let pos = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..pos], start + pos + 2))
}

fn utf8(bytes: &[u8]) -> RespResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| RespError::InvalidEncoding(e.to_string()))
}

fn number(bytes: &[u8]) -> RespResult<i64> {
    utf8(bytes)?
        .parse()
        .map_err(|e| RespError::Protocol(format!("invalid length or integer: {}", e)))
}

fn unexpected(expected: &str, got: &RespValue) -> RespError {
    RespError::Protocol(format!("expected {}, got {:?}", expected, got))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &RespValue) -> Vec<u8> {
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_command() {
        let command = RespValue::command(["RPUSH", "rml:child", "x"]);
        assert_eq!(
            encoded(&command),
            b"*3\r\n$5\r\nRPUSH\r\n$9\r\nrml:child\r\n$1\r\nx\r\n"
        );
    }

    #[test]
    fn test_decode_exec_reply() {
        let mut buf = BytesMut::from(&b"*2\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n:1\r\n"[..]);
        let value = RespValue::decode(&mut buf).unwrap().unwrap();
        let replies = value.as_array().unwrap();
        assert_eq!(replies[0].as_array().unwrap().len(), 2);
        assert_eq!(replies[1].as_integer().unwrap(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_consumed() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        assert_eq!(RespValue::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"r\r\n+OK\r\n");
        let first = RespValue::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, RespValue::command(["foo", "bar"]));
        let second = RespValue::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, RespValue::SimpleString("OK".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_null_forms() {
        let mut buf = BytesMut::from(&b"$-1\r\n*-1\r\n_\r\n"[..]);
        assert_eq!(
            RespValue::decode(&mut buf).unwrap(),
            Some(RespValue::BulkString(None))
        );
        assert_eq!(RespValue::decode(&mut buf).unwrap(), Some(RespValue::Null));
        assert_eq!(RespValue::decode(&mut buf).unwrap(), Some(RespValue::Null));
    }

    #[test]
    fn test_error_reply_and_bad_type() {
        let mut buf = BytesMut::from(&b"-ERR wrong type\r\n"[..]);
        assert_eq!(
            RespValue::decode(&mut buf).unwrap(),
            Some(RespValue::Error("ERR wrong type".to_string()))
        );
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(matches!(
            RespValue::decode(&mut buf),
            Err(RespError::Protocol(_))
        ));
    }
}
