use derive_more::Display;

/// Fatal configuration error raised while binding a service. Nothing is bound
/// when one of these is returned.
#[derive(Debug, Display, derive_more::Error)]
#[non_exhaustive]
pub enum BindError {
    #[display("`{service}` does not declare an rpc interface")]
    NoRpcInterface { service: &'static str },
    #[display("`{service}` declares several rpc interfaces {candidates:?}, designate one explicitly")]
    AmbiguousInterface {
        service: &'static str,
        candidates: Vec<&'static str>,
    },
    #[display("`{service}` has no rpc interface named `{interface}`")]
    UnknownInterface {
        service: &'static str,
        interface: String,
    },
    #[display("interface `{interface}` has no rpc methods")]
    NoServiceName { interface: &'static str },
    #[display("more than one service in interface `{interface}`: {services:?}")]
    MultipleServices {
        interface: &'static str,
        services: Vec<String>,
    },
    #[display("invalid path `{path}` for `{method}`")]
    InvalidPath { method: &'static str, path: String },
    #[display("unknown method type for `{method}`")]
    UnknownMethodType { method: &'static str },
    #[display("duplicate method path `{path}`")]
    DuplicateMethod { path: String },
    #[display("codec for `{method}`: {source}")]
    Codec {
        method: &'static str,
        source: RegistryError,
    },
}

#[derive(Debug, Display, Clone, PartialEq, Eq, derive_more::Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[display("invalid codec reference `{reference}`, expected `<holder>#<field>`")]
    InvalidCodecRef { reference: String },
    #[display("codec `{reference}` is not registered")]
    UnresolvedCodec { reference: String },
    #[display("codec `{reference}` registered twice")]
    DuplicateCodec { reference: String },
}

/// A payload that the codec could not turn into a message.
#[derive(Debug, Display)]
#[display("decode {type_name} failed ({len} bytes)")]
pub struct DecodeError {
    type_name: &'static str,
    len: usize,
    source: anyhow::Error,
}

impl DecodeError {
    pub fn new(type_name: &'static str, len: usize, source: impl Into<anyhow::Error>) -> Self {
        Self {
            type_name,
            len,
            source: source.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Length of the offending payload.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

#[derive(Debug, Display)]
#[display("encode {type_name} failed")]
pub struct EncodeError {
    type_name: &'static str,
    source: anyhow::Error,
}

impl EncodeError {
    pub fn new(type_name: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self {
            type_name,
            source: source.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
