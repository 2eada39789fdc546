//! Adapts an `axum` WebSocket upgrade to the `Stream<Item = Result<Vec<u8>,
//! anyhow::Error>> + Sink<Vec<u8>, Error = anyhow::Error>` shape
//! [`crate::connection::ConnectionManager::accept`] is generic over, so the
//! connection manager itself never depends on `axum`.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, Stream};

/// Non-binary frames (ping/pong/text/close) are swallowed here; axum answers
/// WebSocket pings itself, and this protocol never sends text frames.
pub struct AxumWebSocketTransport {
    inner: WebSocket,
}

impl AxumWebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { inner: socket }
    }
}

impl Stream for AxumWebSocketTransport {
    type Item = Result<Vec<u8>, anyhow::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => return Poll::Ready(Some(Ok(data))),
                Poll::Ready(Some(Ok(Message::Close(_)))) => return Poll::Ready(None),
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Sink<Vec<u8>> for AxumWebSocketTransport {
    type Error = anyhow::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Vec<u8>) -> Result<(), Self::Error> {
        Pin::new(&mut self.get_mut().inner).start_send(Message::Binary(item)).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_close(cx).map_err(Into::into)
    }
}
