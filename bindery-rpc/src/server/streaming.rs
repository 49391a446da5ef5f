use super::{ResponseSink, guard, mismatch, spawn};
use crate::{
    channel::{ChannelPolicy, Inbound, InboundObserver, Outbound},
    observer::ResponseObserver,
    scope::{CallHandle, TaskScope},
};
use async_channel::Receiver;
use bindery_core::{AnyMessage, Message, Status};
use futures_lite::{FutureExt as _, future::Boxed};
use std::{future::Future, pin::pin, sync::Arc};

type ServerStreamFn<Req, Resp> =
    dyn Fn(Req, Outbound<Resp>) -> Boxed<anyhow::Result<()>> + Send + Sync;

type BidiStreamFn<Req, Resp> =
    dyn Fn(Inbound<Req>, Outbound<Resp>) -> Boxed<anyhow::Result<()>> + Send + Sync;

/// One request in, a stream of responses out.
pub struct ServerStreamAdapter<Req, Resp> {
    handler: Arc<ServerStreamFn<Req, Resp>>,
    policy: ChannelPolicy,
}

impl<Req: Message, Resp: Message> ServerStreamAdapter<Req, Resp> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Req, Outbound<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request: Req, responses: Outbound<Resp>| {
                handler(request, responses).boxed()
            }),
            policy: ChannelPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn invoke(
        &self,
        scope: &TaskScope,
        request: AnyMessage,
        response: ResponseObserver,
    ) -> CallHandle {
        let handler = self.handler.clone();
        let (responses, forward) = self.policy.outbound();
        spawn(scope, ResponseSink::new(response), |sink| async move {
            let Ok(request) = Req::from_any(request) else {
                return sink.fail(mismatch::<Req>());
            };
            let call = guard(async move { handler(request, responses.cast()).await });
            pump(sink, forward, call).await;
        })
    }
}

impl<Req, Resp> Clone for ServerStreamAdapter<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            policy: self.policy,
        }
    }
}

/// A stream of requests in, a stream of responses out. Responses can start
/// before the request stream ends.
pub struct BidiStreamAdapter<Req, Resp> {
    handler: Arc<BidiStreamFn<Req, Resp>>,
    policy: ChannelPolicy,
}

impl<Req: Message, Resp: Message> BidiStreamAdapter<Req, Resp> {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Inbound<Req>, Outbound<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |requests: Inbound<Req>, responses: Outbound<Resp>| {
                handler(requests, responses).boxed()
            }),
            policy: ChannelPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn invoke(
        &self,
        scope: &TaskScope,
        response: ResponseObserver,
    ) -> (InboundObserver, CallHandle) {
        let handler = self.handler.clone();
        let (observer, requests) = self.policy.inbound();
        let (responses, forward) = self.policy.outbound();
        let call = spawn(scope, ResponseSink::new(response), |sink| async move {
            let call = guard(async move { handler(requests.cast(), responses.cast()).await });
            pump(sink, forward, call).await;
        });
        (observer, call)
    }
}

impl<Req, Resp> Clone for BidiStreamAdapter<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            policy: self.policy,
        }
    }
}

/// Drives the handler while forwarding its outbound channel into the sink.
///
/// Values the handler sent before it returned are all delivered ahead of the
/// terminal signal. If the sink rejects a value, the channel is closed and the
/// handler is dropped mid-flight.
async fn pump(
    mut sink: ResponseSink,
    forward: Receiver<AnyMessage>,
    call: impl Future<Output = Result<(), Status>>,
) {
    let mut call = pin!(call);
    let result = loop {
        tokio::select! {
            biased;
            message = forward.recv() => match message {
                Ok(message) => {
                    if let Err(status) = sink.next(message) {
                        forward.close();
                        break Err(status);
                    }
                }
                Err(_) => break call.as_mut().await,
            },
            result = call.as_mut() => {
                forward.close();
                break drain(&mut sink, &forward).and(result);
            }
        }
    };
    sink.finish(result);
}

fn drain(sink: &mut ResponseSink, forward: &Receiver<AnyMessage>) -> Result<(), Status> {
    while let Ok(message) = forward.try_recv() {
        sink.next(message)?;
    }
    Ok(())
}
