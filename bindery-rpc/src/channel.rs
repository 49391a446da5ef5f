use crate::observer::StreamObserver;
use async_channel::{Receiver, Sender, TrySendError};
use bindery_core::{AnyMessage, Message, Status};
use futures_lite::{Stream, StreamExt as _};
use std::{
    any::type_name,
    fmt,
    marker::PhantomData,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
};

/// Capacities of the per-call channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    /// `None` buffers without limit.
    pub inbound: Option<usize>,
    pub outbound: usize,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            inbound: None,
            outbound: 16,
        }
    }
}

impl ChannelPolicy {
    /// Opens the inbound half of a call: the observer goes to the transport,
    /// the reader to the handler.
    pub fn inbound(&self) -> (InboundObserver, Inbound<AnyMessage>) {
        let (sender, receiver) = match self.inbound {
            Some(capacity) => async_channel::bounded(capacity.max(1)),
            None => async_channel::unbounded(),
        };
        let terminal = Arc::new(OnceLock::new());
        (
            InboundObserver {
                sender,
                terminal: terminal.clone(),
            },
            Inbound {
                inner: Box::pin(receiver),
                terminal,
                done: false,
                _message: PhantomData,
            },
        )
    }

    /// Opens the outbound half of a call: the writer goes to the handler, the
    /// receiver to the forwarding loop.
    pub fn outbound(&self) -> (Outbound<AnyMessage>, Receiver<AnyMessage>) {
        let (sender, receiver) = async_channel::bounded(self.outbound.max(1));
        (
            Outbound {
                inner: sender,
                _message: PhantomData,
            },
            receiver,
        )
    }
}

/// Messages flowing from the caller into a handler.
///
/// Yields values in the order the transport delivered them. A stream the
/// transport failed yields its error once, after every buffered value, and
/// then ends.
pub struct Inbound<T> {
    inner: Pin<Box<Receiver<AnyMessage>>>,
    terminal: Arc<OnceLock<Status>>,
    done: bool,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> Inbound<T> {
    /// `Ok(None)` once the caller completed the stream.
    pub async fn recv(&mut self) -> Result<Option<T>, Status> {
        self.next().await.transpose()
    }
}

impl<T> Inbound<T> {
    /// Reinterprets the message type. Mismatches surface on read.
    pub fn cast<U>(self) -> Inbound<U> {
        Inbound {
            inner: self.inner,
            terminal: self.terminal,
            done: self.done,
            _message: PhantomData,
        }
    }
}

impl<T: Message> Stream for Inbound<T> {
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(message)) => match T::from_any(message) {
                Ok(message) => Poll::Ready(Some(Ok(message))),
                Err(_) => {
                    this.done = true;
                    Poll::Ready(Some(Err(Status::internal(format!(
                        "inbound message is not a {}",
                        type_name::<T>()
                    )))))
                }
            },
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(this.terminal.get().cloned().map(Err))
            }
        }
    }
}

impl<T> fmt::Debug for Inbound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("buffered", &self.inner.len())
            .field("done", &self.done)
            .finish()
    }
}

/// Messages flowing from a handler back to the caller.
pub struct Outbound<T> {
    inner: Sender<AnyMessage>,
    _message: PhantomData<fn(T)>,
}

impl<T: Message> Outbound<T> {
    /// Waits for room in the channel. Fails with `Cancelled` once the caller
    /// stopped listening.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        self.inner
            .send(message.into_any())
            .await
            .map_err(|_| Status::cancelled("response stream closed"))
    }
}

impl<T> Outbound<T> {
    /// Ends the stream early. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn cast<U>(self) -> Outbound<U> {
        Outbound {
            inner: self.inner,
            _message: PhantomData,
        }
    }
}

impl<T> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _message: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Outbound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// Transport-facing end of an inbound channel.
///
/// `on_next` never blocks: a full bounded channel is reported as
/// `ResourceExhausted`. Transports that can suspend use [`feed`](Self::feed)
/// instead. Dropping the observer without a terminal call fails the stream
/// with `Cancelled`.
#[derive(Debug)]
pub struct InboundObserver {
    sender: Sender<AnyMessage>,
    terminal: Arc<OnceLock<Status>>,
}

impl InboundObserver {
    pub async fn feed(&self, message: AnyMessage) -> Result<(), Status> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Status::cancelled("call already finished"))
    }

    /// True once the stream ended or the handler stopped reading.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl StreamObserver for InboundObserver {
    fn on_next(&mut self, message: AnyMessage) -> Result<(), Status> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Status::resource_exhausted("inbound buffer is full"),
            TrySendError::Closed(_) => Status::cancelled("call already finished"),
        })
    }

    fn on_error(&mut self, status: Status) {
        if !self.sender.is_closed() {
            let _ = self.terminal.set(status);
            self.sender.close();
        }
    }

    fn on_completed(&mut self) {
        self.sender.close();
    }
}

impl Drop for InboundObserver {
    fn drop(&mut self) {
        self.on_error(Status::cancelled("inbound stream abandoned"));
    }
}
