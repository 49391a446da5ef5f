use bindery_core::Status;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{
    runtime::Handle,
    task::{AbortHandle, JoinHandle},
};
use tracing::{Instrument, debug, info};
use ulid::Ulid;

/// Owner of every call task spawned for one server.
///
/// Clones share the same registry, so a shutdown through any clone aborts all
/// live calls.
#[derive(Debug, Clone)]
pub struct TaskScope {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    runtime: Handle,
    calls: Mutex<Calls>,
}

#[derive(Debug, Default)]
struct Calls {
    closed: bool,
    live: HashMap<Ulid, AbortHandle>,
}

impl Inner {
    fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskScope {
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                calls: Mutex::default(),
            }),
        }
    }

    /// Scope on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// When called outside a runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Fails with `Unavailable` after [`shutdown`](Self::shutdown).
    pub fn ensure_open(&self) -> Result<(), Status> {
        if self.inner.calls().closed {
            return Err(Status::unavailable("server is shutting down"));
        }
        Ok(())
    }

    /// Spawns one call in the current span, recording its id there.
    ///
    /// A call that races with shutdown is aborted right away.
    pub fn spawn_call<F>(&self, call: F) -> CallHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = Ulid::new();
        let span = tracing::Span::current();
        span.record("call_id", tracing::field::display(id));
        debug!(parent: &span, "call started");

        let deregister = Deregister {
            inner: self.inner.clone(),
            id,
        };
        let task = async move {
            let _deregister = deregister;
            call.await;
            debug!("call finished");
        }
        .instrument(span);

        let task = {
            let mut calls = self.inner.calls();
            let task = self.inner.runtime.spawn(task);
            if !calls.closed {
                calls.live.insert(id, task.abort_handle());
            }
            task
        };
        if self.is_shutdown() {
            task.abort();
        }
        CallHandle {
            id,
            task: Some(task),
        }
    }

    /// Number of calls that have not finished yet.
    pub fn active_calls(&self) -> usize {
        self.inner.calls().live.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.calls().closed
    }

    /// Aborts every live call and rejects new ones.
    pub fn shutdown(&self) {
        let live = {
            let mut calls = self.inner.calls();
            calls.closed = true;
            std::mem::take(&mut calls.live)
        };
        info!(calls = live.len(), "task scope shut down");
        for task in live.into_values() {
            task.abort();
        }
    }
}

struct Deregister {
    inner: Arc<Inner>,
    id: Ulid,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.inner.calls().live.remove(&self.id);
    }
}

/// Handle on one running call. Dropping it detaches the call.
#[derive(Debug)]
pub struct CallHandle {
    id: Ulid,
    task: Option<JoinHandle<()>>,
}

impl CallHandle {
    /// A call that never started, e.g. because the scope was shut down.
    pub(crate) fn rejected() -> Self {
        Self {
            id: Ulid::new(),
            task: None,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Aborts the call. The response sink observes `Cancelled`.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits until the call task is gone, whether it finished or was aborted.
    pub async fn join(self) {
        if let Some(task) = self.task {
            let _ = task.await;
        }
    }
}
