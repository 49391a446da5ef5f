use crate::{
    channel::{ChannelPolicy, Inbound, Outbound},
    handler::{Arg, Invoker},
    server::{BidiStreamAdapter, ClientStreamAdapter, ServerStreamAdapter, UnaryAdapter},
    service::{Interface, ParamKind, RpcService, Signature},
};
use bindery_core::{
    AnyMessage, BindError, CodecRegistry, MethodDescriptor, MethodPath, MethodType, ReplyKind,
    ServiceDescriptor,
};
use std::{
    any::type_name,
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tracing::{debug, info};

/// Call shape of a method, from its parameter kinds and reply kind.
///
/// The receiver comes first. The second parameter is a message or an inbound
/// channel, an optional third one is an outbound channel. Without an outbound
/// channel the method must answer with a message, with one it must answer
/// with `()`. Anything else has no shape.
pub fn classify(signature: &Signature) -> Option<MethodType> {
    use ParamKind as P;
    use ReplyKind as R;
    match (signature.params.as_slice(), signature.reply) {
        ([P::Receiver, P::Message], R::Message) => Some(MethodType::Unary),
        ([P::Receiver, P::Inbound], R::Message) => Some(MethodType::ClientStreaming),
        ([P::Receiver, P::Message, P::Outbound], R::Unit) => Some(MethodType::ServerStreaming),
        ([P::Receiver, P::Inbound, P::Outbound], R::Unit) => Some(MethodType::BidiStreaming),
        _ => None,
    }
}

/// Builds dispatch tables out of service implementations.
#[derive(Debug, Clone)]
pub struct Binder {
    registry: CodecRegistry,
    policy: ChannelPolicy,
}

impl Binder {
    pub fn new(registry: CodecRegistry) -> Self {
        Self {
            registry,
            policy: ChannelPolicy::default(),
        }
    }

    /// Channel capacities for every call of the tables this binder builds.
    pub fn channel_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The descriptor `bind` would produce, without a service instance.
    pub fn describe<S: RpcService>(&self) -> Result<ServiceDescriptor, BindError> {
        self.plan::<S>(None).map(|(descriptor, _)| descriptor)
    }

    pub fn describe_interface<S: RpcService>(
        &self,
        interface: &str,
    ) -> Result<ServiceDescriptor, BindError> {
        self.plan::<S>(Some(interface))
            .map(|(descriptor, _)| descriptor)
    }

    /// Binds the single rpc interface of `service`.
    ///
    /// Fails if there is none or more than one; see
    /// [`bind_interface`](Self::bind_interface).
    pub fn bind<S: RpcService>(&self, service: S) -> Result<DispatchTable, BindError> {
        self.bind_arc(Arc::new(service), None)
    }

    pub fn bind_interface<S: RpcService>(
        &self,
        service: S,
        interface: &str,
    ) -> Result<DispatchTable, BindError> {
        self.bind_arc(Arc::new(service), Some(interface))
    }

    fn bind_arc<S: RpcService>(
        &self,
        service: Arc<S>,
        interface: Option<&str>,
    ) -> Result<DispatchTable, BindError> {
        let (descriptor, invokers) = self.plan::<S>(interface)?;

        let bindings = descriptor
            .methods()
            .iter()
            .zip(invokers)
            .map(|(method, invoker)| {
                let handler =
                    CallHandler::new(method.method_type(), service.clone(), invoker, self.policy);
                (
                    Arc::<str>::from(method.full_name()),
                    HandlerBinding {
                        descriptor: method.clone(),
                        handler,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        info!(
            service = descriptor.name(),
            methods = bindings.len(),
            "service bound"
        );
        Ok(DispatchTable {
            descriptor,
            bindings,
        })
    }

    /// Resolves everything a bind needs. Invokers come back in the order of
    /// the descriptor's methods.
    fn plan<S: RpcService>(
        &self,
        interface: Option<&str>,
    ) -> Result<(ServiceDescriptor, Vec<Invoker<S>>), BindError> {
        let interface = resolve_interface::<S>(interface)?;
        let interface_name = interface.name();

        let mut paths = HashSet::new();
        let mut methods = Vec::new();
        let mut invokers = Vec::new();
        for method in interface.into_methods() {
            let name = method.name();
            let Some(metadata) = method.metadata().copied() else {
                debug!(method = name, "no rpc metadata, skipped");
                continue;
            };

            let method_type =
                classify(method.signature()).ok_or(BindError::UnknownMethodType { method: name })?;
            let path = MethodPath::parse(metadata.path).ok_or_else(|| BindError::InvalidPath {
                method: name,
                path: metadata.path.to_string(),
            })?;
            if !paths.insert(path.full_name().to_string()) {
                return Err(BindError::DuplicateMethod {
                    path: path.full_name().to_string(),
                });
            }

            let codec = |reference: &str| {
                self.registry
                    .resolve(reference)
                    .map_err(|source| BindError::Codec {
                        method: name,
                        source,
                    })
            };
            let request = codec(metadata.request_codec)?;
            let response = codec(metadata.response_codec)?;

            debug!(method = name, path = %path, kind = %method_type, "method classified");
            methods.push(MethodDescriptor::new(path, method_type, request, response));
            invokers.push(method.invoker().clone());
        }

        let descriptor = ServiceDescriptor::from_methods(interface_name, methods)?;
        Ok((descriptor, invokers))
    }
}

fn resolve_interface<S: RpcService>(name: Option<&str>) -> Result<Interface<S>, BindError> {
    let service = type_name::<S>();
    let mut candidates = S::interfaces()
        .into_iter()
        .filter(|interface| interface.is_rpc())
        .collect::<Vec<_>>();

    if let Some(name) = name {
        let index = candidates
            .iter()
            .position(|interface| interface.name() == name)
            .ok_or_else(|| BindError::UnknownInterface {
                service,
                interface: name.to_string(),
            })?;
        return Ok(candidates.swap_remove(index));
    }

    match candidates.len() {
        0 => Err(BindError::NoRpcInterface { service }),
        1 => Ok(candidates.remove(0)),
        _ => Err(BindError::AmbiguousInterface {
            service,
            candidates: candidates.iter().map(Interface::name).collect(),
        }),
    }
}

/// The adapter serving one method, erased to [`AnyMessage`].
#[derive(Clone)]
pub enum CallHandler {
    Unary(UnaryAdapter<AnyMessage, AnyMessage>),
    ClientStreaming(ClientStreamAdapter<AnyMessage, AnyMessage>),
    ServerStreaming(ServerStreamAdapter<AnyMessage, AnyMessage>),
    BidiStreaming(BidiStreamAdapter<AnyMessage, AnyMessage>),
}

impl CallHandler {
    fn new<S: Send + Sync + 'static>(
        method_type: MethodType,
        service: Arc<S>,
        invoker: Invoker<S>,
        policy: ChannelPolicy,
    ) -> Self {
        match method_type {
            MethodType::Unary => Self::Unary(UnaryAdapter::new(move |request: AnyMessage| {
                let reply = invoker(service.clone(), vec![Arg::Message(request)]);
                async move { anyhow::Ok(reply.await?.into_message()?) }
            })),
            MethodType::ClientStreaming => Self::ClientStreaming(
                ClientStreamAdapter::new(move |requests: Inbound<AnyMessage>| {
                    let reply = invoker(service.clone(), vec![Arg::Inbound(requests)]);
                    async move { anyhow::Ok(reply.await?.into_message()?) }
                })
                .with_policy(policy),
            ),
            MethodType::ServerStreaming => Self::ServerStreaming(
                ServerStreamAdapter::new(
                    move |request: AnyMessage, responses: Outbound<AnyMessage>| {
                        let reply = invoker(
                            service.clone(),
                            vec![Arg::Message(request), Arg::Outbound(responses)],
                        );
                        async move {
                            reply.await?;
                            anyhow::Ok(())
                        }
                    },
                )
                .with_policy(policy),
            ),
            MethodType::BidiStreaming => Self::BidiStreaming(
                BidiStreamAdapter::new(
                    move |requests: Inbound<AnyMessage>, responses: Outbound<AnyMessage>| {
                        let reply = invoker(
                            service.clone(),
                            vec![Arg::Inbound(requests), Arg::Outbound(responses)],
                        );
                        async move {
                            reply.await?;
                            anyhow::Ok(())
                        }
                    },
                )
                .with_policy(policy),
            ),
        }
    }

    pub fn method_type(&self) -> MethodType {
        match self {
            Self::Unary(_) => MethodType::Unary,
            Self::ClientStreaming(_) => MethodType::ClientStreaming,
            Self::ServerStreaming(_) => MethodType::ServerStreaming,
            Self::BidiStreaming(_) => MethodType::BidiStreaming,
        }
    }
}

impl fmt::Debug for CallHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallHandler")
            .field(&self.method_type())
            .finish()
    }
}

/// A method descriptor paired with the adapter serving it.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    descriptor: MethodDescriptor,
    handler: CallHandler,
}

impl HandlerBinding {
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn handler(&self) -> &CallHandler {
        &self.handler
    }

    /// Span for one call of this method. The scope records `call_id` when the
    /// call is spawned inside it.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "call",
            method = self.descriptor.full_name(),
            kind = %self.descriptor.method_type(),
            call_id = tracing::field::Empty,
        )
    }
}

/// Routing table for one bound service, immutable once built.
#[derive(Debug)]
pub struct DispatchTable {
    descriptor: ServiceDescriptor,
    bindings: HashMap<Arc<str>, HandlerBinding>,
}

impl DispatchTable {
    pub fn service_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Accepts the path with or without its leading separator.
    pub fn lookup(&self, path: &str) -> Option<&HandlerBinding> {
        let full_name = path.strip_prefix('/').unwrap_or(path);
        self.bindings.get(full_name)
    }

    /// Bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerBinding> {
        self.descriptor
            .methods()
            .iter()
            .filter_map(|method| self.bindings.get(method.full_name()))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
