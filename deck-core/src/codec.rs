//! Wire framing for the deck control protocol.
//!
//! Requests are single lines terminated by `\n` (an optional preceding
//! `\r` is tolerated and stripped). Responses and asynchronous pushes
//! are written with a trailing `\r\n`, so multi-line blocks that
//! already end in `\r\n` gain their terminating blank line here.

use bytes::{BufMut, BytesMut};

use crate::error::DeckError;

/// A single request line may not exceed this many bytes.
pub const MAX_LINE_LENGTH: usize = 4096;

pub struct DeckCodec;

impl tokio_util::codec::Decoder for DeckCodec {
    type Item = String;
    type Error = DeckError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(DeckError::Syntax("request line too long".into()));
            }
            return Ok(None);
        };

        let mut line = src.split_to(newline + 1);
        line.truncate(newline); // drop the '\n'
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

impl tokio_util::codec::Encoder<String> for DeckCodec {
    type Error = DeckError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
