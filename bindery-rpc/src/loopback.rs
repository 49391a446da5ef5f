//! In-process transport: routes encoded payloads to bound services the way a
//! network server would, without the network.

use crate::{
    binder::{CallHandler, DispatchTable, HandlerBinding},
    channel::InboundObserver,
    observer::{ResponseObserver, StreamObserver},
    scope::{CallHandle, TaskScope},
};
use async_channel::{Receiver, Sender};
use bindery_core::{AnyMessage, Marshaller, MethodPath, MethodType, Status};
use bytes::Bytes;
use futures_lite::{Stream, StreamExt as _};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tracing::warn;

#[derive(Debug)]
enum Event {
    Message(Bytes),
    Error(Status),
    Completed,
}

/// Response observer that encodes into a channel read by the caller.
struct ChannelObserver {
    sender: Sender<Event>,
    marshaller: Marshaller,
}

impl StreamObserver for ChannelObserver {
    fn on_next(&mut self, message: AnyMessage) -> Result<(), Status> {
        let bytes = self
            .marshaller
            .serialize(&message)
            .map_err(|e| Status::internal(format!("{:#}", anyhow::Error::from(e))))?;
        self.sender
            .try_send(Event::Message(bytes))
            .map_err(|_| Status::cancelled("caller went away"))
    }

    fn on_error(&mut self, status: Status) {
        let _ = self.sender.try_send(Event::Error(status));
        self.sender.close();
    }

    fn on_completed(&mut self) {
        let _ = self.sender.try_send(Event::Completed);
        self.sender.close();
    }
}

/// Hosts dispatch tables and drives calls against them.
#[derive(Debug)]
pub struct LoopbackServer {
    services: HashMap<String, Arc<DispatchTable>>,
    scope: TaskScope,
}

impl LoopbackServer {
    pub fn new(scope: TaskScope) -> Self {
        Self {
            services: HashMap::new(),
            scope,
        }
    }

    /// Replaces any table already serving the same service name.
    pub fn add_service(&mut self, table: DispatchTable) -> &mut Self {
        let name = table.service_name().to_string();
        if self.services.insert(name, Arc::new(table)).is_some() {
            warn!("replaced an existing service table");
        }
        self
    }

    pub fn route(&self, path: &str) -> Result<&HandlerBinding, Status> {
        MethodPath::parse(path)
            .and_then(|parsed| self.services.get(parsed.service()))
            .and_then(|table| table.lookup(path))
            .ok_or_else(|| Status::unimplemented(format!("unknown method `{path}`")))
    }

    pub async fn unary(&self, path: &str, request: Bytes) -> Result<Bytes, Status> {
        let binding = self.route(path)?;
        let CallHandler::Unary(adapter) = binding.handler() else {
            return Err(wrong_shape(binding, MethodType::Unary));
        };
        let request = decode(binding, request)?;
        let (observer, mut responses) = open(binding);
        let call = binding
            .span()
            .in_scope(|| adapter.invoke(&self.scope, request, observer));
        responses.call = Some(call);
        responses.single().await
    }

    /// Sends every request in order, then waits for the single response.
    pub async fn client_streaming(
        &self,
        path: &str,
        requests: impl IntoIterator<Item = Bytes>,
    ) -> Result<Bytes, Status> {
        let binding = self.route(path)?;
        let CallHandler::ClientStreaming(adapter) = binding.handler() else {
            return Err(wrong_shape(binding, MethodType::ClientStreaming));
        };
        let (observer, mut responses) = open(binding);
        let (inbound, call) = binding
            .span()
            .in_scope(|| adapter.invoke(&self.scope, observer));
        responses.call = Some(call);

        let mut sink = RequestSink {
            inbound,
            marshaller: binding.descriptor().request_marshaller().clone(),
        };
        for request in requests {
            if sink.send(request).await.is_err() {
                break;
            }
        }
        sink.complete();
        responses.single().await
    }

    pub fn server_streaming(&self, path: &str, request: Bytes) -> Result<ResponseStream, Status> {
        let binding = self.route(path)?;
        let CallHandler::ServerStreaming(adapter) = binding.handler() else {
            return Err(wrong_shape(binding, MethodType::ServerStreaming));
        };
        let request = decode(binding, request)?;
        let (observer, mut responses) = open(binding);
        let call = binding
            .span()
            .in_scope(|| adapter.invoke(&self.scope, request, observer));
        responses.call = Some(call);
        Ok(responses)
    }

    pub fn bidi_streaming(&self, path: &str) -> Result<(RequestSink, ResponseStream), Status> {
        let binding = self.route(path)?;
        let CallHandler::BidiStreaming(adapter) = binding.handler() else {
            return Err(wrong_shape(binding, MethodType::BidiStreaming));
        };
        let (observer, mut responses) = open(binding);
        let (inbound, call) = binding
            .span()
            .in_scope(|| adapter.invoke(&self.scope, observer));
        responses.call = Some(call);
        let sink = RequestSink {
            inbound,
            marshaller: binding.descriptor().request_marshaller().clone(),
        };
        Ok((sink, responses))
    }

    /// Aborts live calls and refuses new ones.
    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

fn open(binding: &HandlerBinding) -> (ResponseObserver, ResponseStream) {
    let (sender, receiver) = async_channel::unbounded();
    let observer = ChannelObserver {
        sender,
        marshaller: binding.descriptor().response_marshaller().clone(),
    };
    (Box::new(observer), ResponseStream::new(receiver))
}

fn decode(binding: &HandlerBinding, request: Bytes) -> Result<AnyMessage, Status> {
    Ok(binding
        .descriptor()
        .request_marshaller()
        .deserialize(request)?)
}

fn wrong_shape(binding: &HandlerBinding, expected: MethodType) -> Status {
    Status::unimplemented(format!(
        "`{}` is a {} method, not {expected}",
        binding.descriptor().full_name(),
        binding.descriptor().method_type(),
    ))
}

/// Request side of a streaming call.
///
/// Dropping it without [`complete`](Self::complete) fails the call's request
/// stream with `Cancelled`.
#[derive(Debug)]
pub struct RequestSink {
    inbound: InboundObserver,
    marshaller: Marshaller,
}

impl RequestSink {
    /// Decodes and queues one request, waiting for room when the inbound
    /// channel is bounded. A payload that does not decode fails the request
    /// stream with `InvalidArgument`.
    pub async fn send(&mut self, request: Bytes) -> Result<(), Status> {
        match self.marshaller.deserialize(request) {
            Ok(message) => self.inbound.feed(message).await,
            Err(e) => {
                let status = Status::from(e);
                self.inbound.on_error(status.clone());
                Err(status)
            }
        }
    }

    pub fn error(&mut self, status: Status) {
        self.inbound.on_error(status);
    }

    pub fn complete(&mut self) {
        self.inbound.on_completed();
    }
}

/// Responses of one call, ending with its status.
///
/// Dropping the stream before the call ends cancels the call.
pub struct ResponseStream {
    events: Pin<Box<Receiver<Event>>>,
    call: Option<CallHandle>,
    done: bool,
}

impl ResponseStream {
    fn new(events: Receiver<Event>) -> Self {
        Self {
            events: Box::pin(events),
            call: None,
            done: false,
        }
    }

    /// Everything up to successful completion, or the first error.
    pub async fn collect_all(mut self) -> Result<Vec<Bytes>, Status> {
        let mut responses = Vec::new();
        while let Some(response) = self.next().await {
            responses.push(response?);
        }
        Ok(responses)
    }

    async fn single(mut self) -> Result<Bytes, Status> {
        let response = self
            .next()
            .await
            .ok_or_else(|| Status::internal("call completed without a response"))??;
        match self.next().await {
            None => Ok(response),
            Some(Err(status)) => Err(status),
            Some(Ok(_)) => Err(Status::internal("more than one response")),
        }
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let event = match this.events.as_mut().poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(event) => event,
        };
        Poll::Ready(match event {
            Some(Event::Message(bytes)) => Some(Ok(bytes)),
            Some(Event::Error(status)) => {
                this.done = true;
                Some(Err(status))
            }
            Some(Event::Completed) => {
                this.done = true;
                None
            }
            None => {
                this.done = true;
                Some(Err(Status::cancelled("call ended without a status")))
            }
        })
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if let (false, Some(call)) = (self.done, &self.call) {
            call.cancel();
        }
    }
}
