use crate::handler::{Handler, Invoker};
use bindery_core::ReplyKind;
use std::fmt;

/// Metadata a code generator attaches to one rpc method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcMetadata {
    /// Wire path, e.g. `/pkg.Service/Method`.
    pub path: &'static str,
    /// Codec reference, `<holder>#<field>`.
    pub request_codec: &'static str,
    pub response_codec: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Receiver,
    Message,
    Inbound,
    Outbound,
}

/// Parameter kinds of a method, receiver included, and what it answers with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<ParamKind>,
    pub reply: ReplyKind,
}

impl Signature {
    pub fn new(params: impl Into<Vec<ParamKind>>, reply: ReplyKind) -> Self {
        Self {
            params: params.into(),
            reply,
        }
    }
}

/// One method of a declared interface.
pub struct DeclaredMethod<S> {
    name: &'static str,
    metadata: Option<RpcMetadata>,
    signature: Signature,
    invoker: Invoker<S>,
}

impl<S: Send + Sync + 'static> DeclaredMethod<S> {
    pub fn new<H, T>(name: &'static str, metadata: Option<RpcMetadata>, handler: H) -> Self
    where
        H: Handler<S, T>,
    {
        Self {
            name,
            metadata,
            signature: H::signature(),
            invoker: handler.into_invoker(),
        }
    }

    /// For generated code that already knows the signature.
    pub fn from_parts(
        name: &'static str,
        metadata: Option<RpcMetadata>,
        signature: Signature,
        invoker: Invoker<S>,
    ) -> Self {
        Self {
            name,
            metadata,
            signature,
            invoker,
        }
    }
}

impl<S> DeclaredMethod<S> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn metadata(&self) -> Option<&RpcMetadata> {
        self.metadata.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn invoker(&self) -> &Invoker<S> {
        &self.invoker
    }
}

impl<S> fmt::Debug for DeclaredMethod<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclaredMethod")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// An interface a service type implements, as emitted by a code generator.
///
/// Only interfaces carrying the rpc marker are considered for binding.
#[derive(Debug)]
pub struct Interface<S> {
    name: &'static str,
    rpc: bool,
    methods: Vec<DeclaredMethod<S>>,
}

impl<S: Send + Sync + 'static> Interface<S> {
    /// An interface carrying the rpc marker.
    pub fn service(name: &'static str) -> Self {
        Self {
            name,
            rpc: true,
            methods: Vec::new(),
        }
    }

    /// Any other interface; the binder skips it.
    pub fn plain(name: &'static str) -> Self {
        Self {
            name,
            rpc: false,
            methods: Vec::new(),
        }
    }

    pub fn rpc<H, T>(self, name: &'static str, metadata: RpcMetadata, handler: H) -> Self
    where
        H: Handler<S, T>,
    {
        self.declare(DeclaredMethod::new(name, Some(metadata), handler))
    }

    /// A method without rpc metadata.
    pub fn method<H, T>(self, name: &'static str, handler: H) -> Self
    where
        H: Handler<S, T>,
    {
        self.declare(DeclaredMethod::new(name, None, handler))
    }

    pub fn declare(mut self, method: DeclaredMethod<S>) -> Self {
        self.methods.push(method);
        self
    }
}

impl<S> Interface<S> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_rpc(&self) -> bool {
        self.rpc
    }

    pub fn methods(&self) -> &[DeclaredMethod<S>] {
        &self.methods
    }

    pub fn into_methods(self) -> Vec<DeclaredMethod<S>> {
        self.methods
    }
}

/// A service type whose interfaces can be bound to a dispatch table.
///
/// Usually implemented by generated code.
pub trait RpcService: Send + Sync + Sized + 'static {
    fn interfaces() -> Vec<Interface<Self>>;
}
