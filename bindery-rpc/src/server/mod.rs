//! Call adapters: bridge handlers written against [`Inbound`]/[`Outbound`]
//! channels to a transport that drives calls through observers.
//!
//! Every invocation spawns its handler through a [`TaskScope`] and returns a
//! [`CallHandle`]. The response observer receives exactly one terminal
//! signal, including when the call panics or is aborted.
//!
//! [`Inbound`]: crate::Inbound
//! [`Outbound`]: crate::Outbound

use crate::{
    observer::ResponseObserver,
    scope::{CallHandle, TaskScope},
};
use bindery_core::{AnyMessage, Status};
use futures_lite::FutureExt as _;
use std::{any::type_name, future::Future, panic::AssertUnwindSafe};

pub use streaming::{BidiStreamAdapter, ServerStreamAdapter};
pub use unary::{ClientStreamAdapter, UnaryAdapter};

mod streaming;
mod unary;

/// Response observer of one call, closed exactly once.
///
/// Dropped without a terminal signal, which happens when the call task is
/// aborted, it reports `Cancelled`.
struct ResponseSink {
    observer: Option<ResponseObserver>,
}

impl ResponseSink {
    fn new(observer: ResponseObserver) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    fn next(&mut self, message: AnyMessage) -> Result<(), Status> {
        match &mut self.observer {
            Some(observer) => observer.on_next(message),
            None => Err(Status::failed_precondition("response stream already closed")),
        }
    }

    fn finish(mut self, result: Result<(), Status>) {
        let Some(mut observer) = self.observer.take() else {
            return;
        };
        match result {
            Ok(()) => observer.on_completed(),
            Err(status) => {
                tracing::debug!(%status, "call failed");
                observer.on_error(status)
            }
        }
    }

    fn fail(self, status: Status) {
        self.finish(Err(status))
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if let Some(mut observer) = self.observer.take() {
            tracing::debug!("call cancelled");
            observer.on_error(Status::cancelled("call cancelled"));
        }
    }
}

/// Runs handler code, turning errors and panics into a status.
async fn guard<T>(call: impl Future<Output = anyhow::Result<T>> + Send) -> Result<T, Status> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Status::from_error(&e)),
        Err(_) => {
            tracing::error!("handler panicked");
            Err(Status::internal("handler panicked"))
        }
    }
}

/// Spawns `call` unless the scope is shut down, in which case the sink is
/// failed with `Unavailable` right away.
fn spawn<F, Fut>(scope: &TaskScope, sink: ResponseSink, call: F) -> CallHandle
where
    F: FnOnce(ResponseSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    match scope.ensure_open() {
        Ok(()) => scope.spawn_call(call(sink)),
        Err(status) => {
            sink.fail(status);
            CallHandle::rejected()
        }
    }
}

fn mismatch<T>() -> Status {
    Status::internal(format!("request is not a {}", type_name::<T>()))
}
