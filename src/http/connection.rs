use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

/// Turns one parsed request into one response.
///
/// Implementations must answer every request; failures are expressed as
/// error responses, never as `Err`.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request, peer: SocketAddr) -> impl Future<Output = Response> + Send;
}

pub struct Connection<H> {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    state: ConnectionState,
    handler: Arc<H>,
    shutdown: watch::Receiver<bool>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl<H: Handler> Connection<H> {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        handler: Arc<H>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            handler,
            shutdown,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await {
                    Ok(Some(req)) => {
                        self.state = ConnectionState::Processing(req);
                    }
                    Ok(None) => {
                        self.state = ConnectionState::Closed;
                    }
                    Err(ReadError::Malformed(e)) => {
                        tracing::debug!(peer = %self.peer, error = ?e, "Malformed request");
                        let writer = ResponseWriter::new(&Response::bad_request());
                        self.state = ConnectionState::Writing(writer, false);
                    }
                    Err(ReadError::Io(e)) => return Err(e.into()),
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let response = self.handler.handle(req, self.peer).await;

                    let writer = ResponseWriter::new(&response);
                    self.state = ConnectionState::Writing(writer, keep_alive);
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    // Finish the current exchange, but take no new work once draining.
                    if keep_alive && !*self.shutdown.borrow() {
                        self.state = ConnectionState::Reading;
                    } else {
                        self.state = ConnectionState::Closed;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> Result<Option<Request>, ReadError> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Err(ReadError::Malformed(e)),
            }

            let mut temp = [0u8; 4096];
            let idle = self.buffer.is_empty();

            let n = tokio::select! {
                res = self.stream.read(&mut temp) => res.map_err(ReadError::Io)?,
                // An idle keep-alive connection is dropped as soon as draining starts.
                _ = self.shutdown.wait_for(|stop| *stop), if idle => return Ok(None),
            };

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

enum ReadError {
    Malformed(ParseError),
    Io(std::io::Error),
}
