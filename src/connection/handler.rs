// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use crate::core::CoredgeError;
use crate::core::handler::RequestHandler;
use crate::core::protocol::{self, Request, Response};
use crate::core::state::MemberState;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info};

/// Serves one client: reads a request per line, writes one response per line.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, LinesCodec>,
    addr: SocketAddr,
    state: Arc<MemberState>,
    requests: RequestHandler,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<MemberState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, protocol::codec()),
            addr,
            requests: RequestHandler::new(state.clone()),
            state,
            session_id,
            shutdown_rx,
            global_shutdown_rx,
        }
    }

    /// The main event loop for the connection.
    pub async fn run(&mut self) -> Result<(), CoredgeError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);
        loop {
            tokio::select! {
                biased;
                _ = self.global_shutdown_rx.recv() => {
                    info!("Connection handler for {} received GLOBAL shutdown signal.", self.addr);
                    let shutdown = Response::error(&CoredgeError::ServiceUnavailable(
                        format!("Server {} is shutting down", self.state.me.client_addr),
                    ));
                    let _ = self.send(&shutdown).await;
                    return Ok(());
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received kill signal.", self.addr);
                    return Ok(());
                }
                line = self.framed.next() => match line {
                    Some(Ok(line)) => {
                        let response = match protocol::decode_line::<Request>(&line) {
                            Ok(request) => {
                                debug!("Session {}: Received request: {:?}", self.session_id, request);
                                self.requests.handle(request).await
                            }
                            Err(e) => Response::error(&CoredgeError::Protocol(e.to_string())),
                        };
                        self.send(&response).await?;
                        self.update_client_last_activity().await;
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let err = CoredgeError::Protocol("request line too long".into());
                        self.send(&Response::error(&err)).await?;
                        return Err(err);
                    }
                    Some(Err(e)) => {
                        let err = CoredgeError::from(e);
                        if is_normal_disconnect(&err) {
                            debug!("Client {} disconnected: {}", self.addr, err);
                            return Ok(());
                        }
                        return Err(err);
                    }
                    None => {
                        debug!("Client {} closed the connection.", self.addr);
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), CoredgeError> {
        let line = protocol::encode_line(response)?;
        self.framed.send(line).await?;
        Ok(())
    }

    async fn update_client_last_activity(&self) {
        let client = self
            .state
            .clients
            .get(&self.session_id)
            .map(|entry| entry.value().0.clone());
        if let Some(client) = client {
            let mut info = client.lock().await;
            info.last_request_time = Instant::now();
            info.requests += 1;
        }
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &CoredgeError) -> bool {
    matches!(e, CoredgeError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
