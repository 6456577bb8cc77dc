//! Server-stream subscriptions.
//!
//! A subscription is a set of channels: the items received so far, a
//! one-shot side channel that carries the single terminal error, if any, and
//! a one-shot signal fired once the server has accepted the stream. A clean
//! end of stream closes the item channel without an error.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tracing::debug;

use crate::error::{TransportError, TransportResult};

/// Items buffered between the network pump and the consumer.
pub const STREAM_BUFFER: usize = 100;

/// Receiving half of a stream subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    /// Received items in stream order.
    pub items: mpsc::Receiver<T>,
    /// Terminal error; always delivered before `items` closes.
    pub error: oneshot::Receiver<TransportError>,
    /// Fires when the stream is established; dropped unfired when opening
    /// fails.
    pub opened: oneshot::Receiver<()>,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair.
    pub fn channel(buffer: usize) -> (SubscriptionSender<T>, Subscription<T>) {
        let (items_tx, items_rx) = mpsc::channel(buffer);
        let (error_tx, error_rx) = oneshot::channel();
        let (opened_tx, opened_rx) = oneshot::channel();
        (
            SubscriptionSender {
                items: items_tx,
                error: error_tx,
                opened: Some(opened_tx),
            },
            Subscription {
                items: items_rx,
                error: error_rx,
                opened: opened_rx,
            },
        )
    }

    /// Subscription that ends immediately with `error`.
    pub fn failed(error: TransportError) -> Self {
        let (tx, rx) = Self::channel(1);
        tx.fail(error);
        rx
    }

    /// Terminal error, once `items` has returned `None`.
    pub fn take_error(&mut self) -> Option<TransportError> {
        self.error.try_recv().ok()
    }
}

/// Producing half of a stream subscription.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    items: mpsc::Sender<T>,
    error: oneshot::Sender<TransportError>,
    opened: Option<oneshot::Sender<()>>,
}

impl<T> SubscriptionSender<T> {
    /// Signal that the server accepted the stream. Later calls are no-ops.
    pub fn opened(&mut self) {
        if let Some(opened) = self.opened.take() {
            let _ = opened.send(());
        }
    }

    /// Forward an item; false once the consumer has gone away.
    pub async fn send(&self, item: T) -> bool {
        self.items.send(item).await.is_ok()
    }

    /// End the subscription with `error`.
    pub fn fail(self, error: TransportError) {
        // Error first, so the consumer finds it when `items` closes.
        let _ = self.error.send(error);
        drop(self.items);
    }
}

/// Open a server stream in the background and forward its messages.
pub(crate) fn spawn_pump<M, T, F>(open: F, cancel: CancellationToken, method: &'static str) -> Subscription<T>
where
    M: Send + 'static,
    T: From<M> + Send + 'static,
    F: Future<Output = TransportResult<Streaming<M>>> + Send + 'static,
{
    let (mut tx, subscription) = Subscription::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut stream = match open.await {
            Ok(stream) => stream,
            Err(e) => {
                tx.fail(e);
                return;
            }
        };
        debug!(method, "Stream opened");
        tx.opened();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(method, "Stream cancelled");
                    return;
                }
                message = stream.message() => match message {
                    Ok(Some(message)) => {
                        if !tx.send(T::from(message)).await {
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!(method, "Stream closed by server");
                        return;
                    }
                    Err(status) => {
                        tx.fail(TransportError::Status(status));
                        return;
                    }
                },
            }
        }
    });

    subscription
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_visible_after_items_close() {
        let (tx, mut sub) = Subscription::<u32>::channel(4);
        assert!(tx.send(1).await);
        tx.fail(TransportError::Stream("reset".into()));

        assert_eq!(sub.items.recv().await, Some(1));
        assert_eq!(sub.items.recv().await, None);
        let err = sub.take_error().unwrap();
        assert_eq!(err.to_string(), "stream error: reset");
    }

    #[tokio::test]
    async fn test_clean_close_has_no_error() {
        let (tx, mut sub) = Subscription::<u32>::channel(4);
        drop(tx);
        assert_eq!(sub.items.recv().await, None);
        assert!(sub.take_error().is_none());
    }

    #[tokio::test]
    async fn test_failed_subscription() {
        let mut sub = Subscription::<u32>::failed(TransportError::Rejected("nope".into()));
        assert_eq!(sub.items.recv().await, None);
        assert!(sub.take_error().unwrap().is_rejection());
        assert!(sub.opened.await.is_err());
    }

    #[tokio::test]
    async fn test_opened_fires_once() {
        let (mut tx, sub) = Subscription::<u32>::channel(1);
        tx.opened();
        tx.opened();
        assert!(sub.opened.await.is_ok());
    }
}
