use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes a response into its HTTP/1.1 wire form.
///
/// `Other` statuses have no reason phrase, so their status line ends right
/// after the code.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    encode(resp).to_vec()
}

fn encode(resp: &Response) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + resp.body.len());

    buf.put_slice(HTTP_VERSION.as_bytes());
    buf.put_slice(format!(" {}", resp.status.as_u16()).as_bytes());
    let reason = resp.status.reason_phrase();
    if !reason.is_empty() {
        buf.put_u8(b' ');
        buf.put_slice(reason.as_bytes());
    }
    buf.put_slice(b"\r\n");

    for (name, value) in &resp.headers {
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.put_slice(&resp.body);

    buf.freeze()
}

/// A serialized response waiting to go out on a client connection.
pub struct ResponseWriter {
    pending: Bytes,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            pending: encode(response),
        }
    }

    /// Bytes not yet written.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all_buf(&mut self.pending).await?;
        stream.flush().await?;
        Ok(())
    }
}
