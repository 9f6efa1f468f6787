// src/core/client/tcp.rs

use super::Connector;
use crate::core::errors::CoredgeError;
use crate::core::protocol::{self, Request, Response};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens one TCP connection per call.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    read_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TcpConnector {
    /// `read_timeout` should exceed the members' routing timeout, since a
    /// `Route` request may legitimately wait that long for a leader.
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    async fn exchange(&self, address: &str, request: Request) -> Result<Response, CoredgeError> {
        let stream = timeout(CLIENT_CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| CoredgeError::Internal("connect timeout".into()))??;
        let mut framed = Framed::new(stream, protocol::codec());

        let line = protocol::encode_line(&request)?;
        timeout(CLIENT_WRITE_TIMEOUT, framed.send(line))
            .await
            .map_err(|_| CoredgeError::Internal("write timeout".into()))??;

        match timeout(self.read_timeout, framed.next()).await {
            Ok(Some(line)) => protocol::decode_line(&line?),
            Ok(None) => Err(CoredgeError::Internal("connection closed by peer".into())),
            Err(_) => Err(CoredgeError::Internal("read timeout".into())),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    /// Transport failures become `Unreachable`. A member that answers with
    /// something undecodable is still alive, so that surfaces as `Protocol`.
    async fn call(&self, address: &str, request: Request) -> Result<Response, CoredgeError> {
        self.exchange(address, request).await.map_err(|e| match e {
            CoredgeError::Protocol(_) => {
                debug!("Malformed reply from {}: {}", address, e);
                e
            }
            _ => {
                debug!("Call to {} failed: {}", address, e);
                CoredgeError::Unreachable {
                    address: address.to_string(),
                }
            }
        })
    }
}
