//! RESP reply encoder

use crate::RespValue;
use bytes::{BufMut, BytesMut};
use std::io::{self, Write};

/// Encodes RESP values into a writer
pub struct RespEncoder<W: Write> {
    writer: W,
    buf: BytesMut,
}

impl<W: Write> RespEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Encode one value and flush it to the writer
    pub fn encode(&mut self, value: &RespValue) -> io::Result<()> {
        self.buf.clear();
        encode_into(value, &mut self.buf);
        self.writer.write_all(&self.buf)?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// Append the wire form of `value` to `buf`
pub fn encode_into(value: &RespValue, buf: &mut BytesMut) {
    match value {
        RespValue::SimpleString(s) => put_line(buf, b'+', s),
        RespValue::Error(e) => put_line(buf, b'-', e),
        RespValue::Integer(i) => put_line(buf, b':', i.to_string().as_bytes()),
        RespValue::BulkString(Some(bytes)) => {
            put_line(buf, b'$', bytes.len().to_string().as_bytes());
            buf.put_slice(bytes);
            buf.put_slice(b"\r\n");
        }
        RespValue::BulkString(None) | RespValue::Null => buf.put_slice(b"$-1\r\n"),
        RespValue::Array(items) => {
            put_line(buf, b'*', items.len().to_string().as_bytes());
            for item in items {
                encode_into(item, buf);
            }
        }
    }
}

/// Encode RESP value and return byte vector
pub fn encode_to_vec(value: &RespValue) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf);
    buf.to_vec()
}
