//! One tunnel connection seen as a sequence of whole [`Frame`]s.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::tunnel::Frame;

/// A duplex, message-oriented connection carrying frames.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError>;

    async fn recv_frame(&mut self) -> Result<Frame, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<S> FrameTransport for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame).map_err(TransportError::Encode)?;
        self.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(&text).map_err(TransportError::Decode);
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return serde_json::from_slice(&data).map_err(TransportError::Decode);
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    self.send(WsMessage::Pong(data)).await?;
                }
                Some(Ok(WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        WebSocketStream::close(self, None).await?;
        Ok(())
    }
}

/// Transport channel shared between tasks.
///
/// Every operation takes the same lock for its whole duration, so frames
/// never interleave and a request and its reply stay paired.
pub struct Channel {
    inner: Mutex<Option<Box<dyn FrameTransport>>>,
}

impl Channel {
    pub fn new<T>(transport: T) -> Self
    where
        T: FrameTransport + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(transport))),
        }
    }

    pub async fn send(&self, frame: impl Into<Frame>) -> Result<(), TransportError> {
        let frame = frame.into();
        let mut guard = self.inner.lock().await;
        let transport = guard.as_mut().ok_or(TransportError::Closed)?;
        trace!("sending {:?}", frame);
        transport.send_frame(&frame).await
    }

    pub async fn receive(&self) -> Result<Frame, TransportError> {
        let mut guard = self.inner.lock().await;
        let transport = guard.as_mut().ok_or(TransportError::Closed)?;
        let frame = transport.recv_frame().await?;
        trace!("recv {:?}", frame);
        Ok(frame)
    }

    /// Send a request and read the next frame as its reply under one lock.
    ///
    /// With a `deadline`, the pair must complete within it. Any failure,
    /// expiry included, closes the channel: a reply still in flight would
    /// otherwise be read as the answer to the next request.
    pub async fn round_trip(
        &self,
        request: impl Into<Frame>,
        deadline: Option<Duration>,
    ) -> Result<Frame, TransportError> {
        let request = request.into();
        let mut guard = self.inner.lock().await;

        let result = {
            let transport = guard.as_mut().ok_or(TransportError::Closed)?;
            let exchange = async {
                trace!("sending {:?}", request);
                transport.send_frame(&request).await?;
                let reply = transport.recv_frame().await?;
                trace!("recv {:?}", reply);
                Ok::<_, TransportError>(reply)
            };

            match deadline {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .unwrap_or(Err(TransportError::Timeout(limit))),
                None => exchange.await,
            }
        };

        if let Err(e) = &result {
            debug!("closing channel after failed exchange: {}", e);
            if let Some(mut transport) = guard.take() {
                let _ = transport.close().await;
            }
        }
        result
    }

    /// Close the connection. Later operations fail with `Closed`.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        match guard.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}
