//! Incremental wire codec for commands and replies.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Command, CommandError, Reply, Result};

impl Command {
    /// Encode the command as an array of bulk strings.
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let parts = self.parts();
        buf.put_slice(format!("*{}\r\n", parts.len()).as_bytes());
        for part in parts {
            buf.put_slice(format!("${}\r\n", part.len()).as_bytes());
            buf.put_slice(&part);
            buf.put_slice(b"\r\n");
        }
    }

    fn parts(&self) -> Vec<Bytes> {
        fn arg(s: &str) -> Bytes {
            Bytes::copy_from_slice(s.as_bytes())
        }
        fn num(n: i64) -> Bytes {
            Bytes::from(n.to_string().into_bytes())
        }

        match self {
            Self::Exists { key } => vec![arg("EXISTS"), arg(key)],
            Self::RPush { key, value } => vec![arg("RPUSH"), arg(key), value.clone()],
            Self::RPushX { key, value } => vec![arg("RPUSHX"), arg(key), value.clone()],
            Self::LPushX { key, value } => vec![arg("LPUSHX"), arg(key), value.clone()],
            Self::LRem { key, count, value } => {
                vec![arg("LREM"), arg(key), num(*count), value.clone()]
            }
            Self::LInsertBefore { key, pivot, value } => vec![
                arg("LINSERT"),
                arg(key),
                arg("BEFORE"),
                pivot.clone(),
                value.clone(),
            ],
            Self::LRange { key, start, stop } => {
                vec![arg("LRANGE"), arg(key), num(*start), num(*stop)]
            }
            Self::LLen { key } => vec![arg("LLEN"), arg(key)],
            Self::LTrim { key, start, stop } => {
                vec![arg("LTRIM"), arg(key), num(*start), num(*stop)]
            }
            Self::Del { key } => vec![arg("DEL"), arg(key)],
            Self::Rename { from, to } => vec![arg("RENAME"), arg(from), arg(to)],
            Self::Keys { pattern } => vec![arg("KEYS"), arg(pattern)],
            Self::Ping => vec![arg("PING")],
            Self::Quit => vec![arg("QUIT")],
        }
    }
}

impl Reply {
    /// Try to decode one complete reply from the front of `buf`.
    ///
    /// Returns `None` without consuming anything when the frame is still
    /// incomplete, so the read loop can append more data and retry.
    pub(crate) fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        let mut pos = 0;
        match parse(buf, &mut pos)? {
            Some(reply) => {
                buf.advance(pos);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

fn parse(buf: &[u8], pos: &mut usize) -> Result<Option<Reply>> {
    let Some(line) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let (marker, rest) = line.split_first().ok_or_else(|| protocol("empty frame"))?;

    match *marker {
        b'+' => Ok(Some(Reply::Status(text(rest)?.to_owned()))),
        b'-' => Ok(Some(Reply::Error(text(rest)?.to_owned()))),
        b':' => Ok(Some(Reply::Integer(integer(rest)?))),
        b'$' => {
            let len = integer(rest)?;
            if len < 0 {
                return Ok(Some(Reply::Bulk(None)));
            }
            let len = len as usize;
            if buf.len() < *pos + len + 2 {
                return Ok(None);
            }
            let data = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                return Err(protocol("bulk frame not terminated"));
            }
            *pos += len + 2;
            Ok(Some(Reply::Bulk(Some(data))))
        }
        b'*' => {
            let len = integer(rest)?;
            if len < 0 {
                return Ok(Some(Reply::Multi(Vec::new())));
            }
            let mut replies = Vec::with_capacity(len as usize);
            for _ in 0..len {
                match parse(buf, pos)? {
                    Some(reply) => replies.push(reply),
                    None => return Ok(None),
                }
            }
            Ok(Some(Reply::Multi(replies)))
        }
        other => Err(protocol(format!("unknown reply marker {:?}", other as char))),
    }
}

/// Read one `\r\n`-terminated line starting at `pos`, advancing past it.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a [u8]>> {
    let haystack = &buf[(*pos).min(buf.len())..];
    let Some(end) = haystack.windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    let line = &haystack[..end];
    *pos += end + 2;
    Ok(Some(line))
}

fn text(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| protocol("invalid UTF-8 in reply"))
}

fn integer(data: &[u8]) -> Result<i64> {
    text(data)?
        .parse()
        .map_err(|_| protocol("invalid integer in reply"))
}

fn protocol(msg: impl Into<String>) -> CommandError {
    CommandError::Protocol(msg.into())
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::super::{Command, Reply};

    fn decode_all(data: &[u8]) -> Vec<Reply> {
        let mut buf = BytesMut::from(data);
        let mut replies = Vec::new();
        while let Some(reply) = Reply::decode(&mut buf).unwrap() {
            replies.push(reply);
        }
        assert!(buf.is_empty());
        replies
    }

    #[test]
    fn encodes_as_bulk_string_array() {
        let mut buf = BytesMut::new();
        Command::RPushX {
            key: "home:1".to_owned(),
            value: Bytes::from_static(b"e1"),
        }
        .encode(&mut buf);

        assert_eq!(&buf[..], b"*3\r\n$6\r\nRPUSHX\r\n$6\r\nhome:1\r\n$2\r\ne1\r\n");
    }

    #[test]
    fn encodes_linsert_with_position_argument() {
        let mut buf = BytesMut::new();
        Command::LInsertBefore {
            key: "t".to_owned(),
            pivot: Bytes::from_static(b"old"),
            value: Bytes::from_static(b"new"),
        }
        .encode(&mut buf);

        assert_eq!(
            &buf[..],
            b"*5\r\n$7\r\nLINSERT\r\n$1\r\nt\r\n$6\r\nBEFORE\r\n$3\r\nold\r\n$3\r\nnew\r\n"
        );
    }

    #[test]
    fn decodes_scalar_replies() {
        let replies = decode_all(b"+OK\r\n:42\r\n-ERR boom\r\n$-1\r\n");
        assert_eq!(
            replies,
            vec![
                Reply::Status("OK".to_owned()),
                Reply::Integer(42),
                Reply::Error("ERR boom".to_owned()),
                Reply::Bulk(None),
            ]
        );
    }

    #[test]
    fn decodes_multi_bulk() {
        let replies = decode_all(b"*2\r\n$2\r\ne2\r\n$2\r\ne1\r\n");
        assert_eq!(
            replies,
            vec![Reply::Multi(vec![
                Reply::Bulk(Some(Bytes::from_static(b"e2"))),
                Reply::Bulk(Some(Bytes::from_static(b"e1"))),
            ])]
        );
    }

    #[test]
    fn incomplete_frames_consume_nothing() {
        let mut buf = BytesMut::from(&b"*2\r\n$2\r\ne2\r\n$2\r\ne"[..]);
        let before = buf.clone();
        assert!(Reply::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf, before);

        buf.extend_from_slice(b"1\r\n");
        assert!(Reply::decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(Reply::decode(&mut buf).is_err());
    }
}
