use crate::{BindError, CodecRef, Marshaller};
use derive_more::Display;
use std::{collections::BTreeSet, sync::Arc};

/// The four rpc call shapes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    #[display("unary")]
    Unary,
    #[display("client streaming")]
    ClientStreaming,
    #[display("server streaming")]
    ServerStreaming,
    #[display("bidi streaming")]
    BidiStreaming,
}

/// A declared wire path such as `/pkg.Service/Method`.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{full_name}")]
pub struct MethodPath {
    full_name: Arc<str>,
    service_len: usize,
}

impl MethodPath {
    /// Strips the leading separator. Returns `None` unless the first segment
    /// is non-empty.
    pub fn parse(path: &str) -> Option<Self> {
        let full_name = path.strip_prefix('/').unwrap_or(path);
        let service = full_name.split('/').next().unwrap_or_default();
        if service.is_empty() {
            return None;
        }
        Some(Self {
            service_len: service.len(),
            full_name: Arc::from(full_name),
        })
    }

    /// Path without the leading separator, the key used for dispatch.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn service(&self) -> &str {
        &self.full_name[..self.service_len]
    }

    /// Everything after the service segment; empty for a bare service path.
    pub fn method(&self) -> &str {
        self.full_name[self.service_len..]
            .strip_prefix('/')
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    path: MethodPath,
    method_type: MethodType,
    request_codec: CodecRef,
    response_codec: CodecRef,
    request: Marshaller,
    response: Marshaller,
}

impl MethodDescriptor {
    pub fn new(
        path: MethodPath,
        method_type: MethodType,
        (request_codec, request): (CodecRef, Marshaller),
        (response_codec, response): (CodecRef, Marshaller),
    ) -> Self {
        Self {
            path,
            method_type,
            request_codec,
            response_codec,
            request,
            response,
        }
    }

    pub fn path(&self) -> &MethodPath {
        &self.path
    }

    pub fn full_name(&self) -> &str {
        self.path.full_name()
    }

    pub fn method_type(&self) -> MethodType {
        self.method_type
    }

    pub fn request_codec(&self) -> &CodecRef {
        &self.request_codec
    }

    pub fn response_codec(&self) -> &CodecRef {
        &self.response_codec
    }

    pub fn request_marshaller(&self) -> &Marshaller {
        &self.request
    }

    pub fn response_marshaller(&self) -> &Marshaller {
        &self.response
    }
}

/// All methods of one service, sharing a single service name.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: Arc<str>,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Fails unless the methods name exactly one service. `interface` only
    /// labels the error.
    pub fn from_methods(
        interface: &'static str,
        methods: Vec<MethodDescriptor>,
    ) -> Result<Self, BindError> {
        let mut services = methods
            .iter()
            .map(|method| method.path().service())
            .collect::<BTreeSet<_>>();

        if services.len() > 1 {
            return Err(BindError::MultipleServices {
                interface,
                services: services.into_iter().map(String::from).collect(),
            });
        }
        let name = services
            .pop_first()
            .map(Arc::<str>::from)
            .ok_or(BindError::NoServiceName { interface })?;

        Ok(Self { name, methods })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, full_name: &str) -> Option<&MethodDescriptor> {
        let full_name = full_name.strip_prefix('/').unwrap_or(full_name);
        self.methods.iter().find(|m| m.full_name() == full_name)
    }
}
