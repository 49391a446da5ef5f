use super::{ResponseSink, guard, mismatch, spawn};
use crate::{
    channel::{ChannelPolicy, Inbound, InboundObserver},
    observer::ResponseObserver,
    scope::{CallHandle, TaskScope},
};
use bindery_core::{AnyMessage, Message};
use futures_lite::{FutureExt as _, future::Boxed};
use std::{future::Future, sync::Arc};

type UnaryFn<Req, Resp> = dyn Fn(Req) -> Boxed<anyhow::Result<Resp>> + Send + Sync;

type ClientStreamFn<Req, Resp> = dyn Fn(Inbound<Req>) -> Boxed<anyhow::Result<Resp>> + Send + Sync;

/// One request in, one response out.
pub struct UnaryAdapter<Req, Resp> {
    handler: Arc<UnaryFn<Req, Resp>>,
}

impl<Req: Message, Resp: Message> UnaryAdapter<Req, Resp> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request: Req| handler(request).boxed()),
        }
    }

    pub fn invoke(
        &self,
        scope: &TaskScope,
        request: AnyMessage,
        response: ResponseObserver,
    ) -> CallHandle {
        let handler = self.handler.clone();
        spawn(scope, ResponseSink::new(response), |mut sink| async move {
            let Ok(request) = Req::from_any(request) else {
                return sink.fail(mismatch::<Req>());
            };
            let result = guard(async move { handler(request).await })
                .await
                .and_then(|response| sink.next(response.into_any()));
            sink.finish(result);
        })
    }
}

impl<Req, Resp> Clone for UnaryAdapter<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

/// A stream of requests in, one response out.
pub struct ClientStreamAdapter<Req, Resp> {
    handler: Arc<ClientStreamFn<Req, Resp>>,
    policy: ChannelPolicy,
}

impl<Req: Message, Resp: Message> ClientStreamAdapter<Req, Resp> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Inbound<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |requests: Inbound<Req>| handler(requests).boxed()),
            policy: ChannelPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Starts the handler and returns the observer the transport feeds
    /// requests into.
    pub fn invoke(
        &self,
        scope: &TaskScope,
        response: ResponseObserver,
    ) -> (InboundObserver, CallHandle) {
        let (observer, requests) = self.policy.inbound();
        let handler = self.handler.clone();
        let call = spawn(scope, ResponseSink::new(response), |mut sink| async move {
            let result = guard(async move { handler(requests.cast()).await })
                .await
                .and_then(|response| sink.next(response.into_any()));
            sink.finish(result);
        });
        (observer, call)
    }
}

impl<Req, Resp> Clone for ClientStreamAdapter<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            policy: self.policy,
        }
    }
}
