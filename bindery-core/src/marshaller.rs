use crate::{AnyMessage, Codec, DecodeError, EncodeError};
use bytes::{Buf, Bytes};
use std::{any::type_name, fmt, sync::Arc};

trait ErasedCodec: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn encode_any(&self, message: &AnyMessage) -> Result<Bytes, EncodeError>;

    fn decode_any(&self, bytes: &[u8]) -> Result<AnyMessage, DecodeError>;
}

impl<C: Codec> ErasedCodec for C {
    fn type_name(&self) -> &'static str {
        type_name::<C::Message>()
    }

    fn encode_any(&self, message: &AnyMessage) -> Result<Bytes, EncodeError> {
        let message = message.downcast_ref::<C::Message>().ok_or_else(|| {
            EncodeError::new(
                self.type_name(),
                anyhow::anyhow!("message is not a {}", self.type_name()),
            )
        })?;
        self.encode(message)
            .map_err(|e| EncodeError::new(self.type_name(), e))
    }

    fn decode_any(&self, bytes: &[u8]) -> Result<AnyMessage, DecodeError> {
        self.decode(bytes)
            .map(|message| Box::new(message) as AnyMessage)
            .map_err(|e| DecodeError::new(self.type_name(), bytes.len(), e))
    }
}

/// Wraps one codec so a transport can move opaque payloads in and out of
/// erased messages.
#[derive(Clone)]
pub struct Marshaller {
    codec: Arc<dyn ErasedCodec>,
}

impl Marshaller {
    pub fn new<C: Codec>(codec: C) -> Self {
        Self {
            codec: Arc::new(codec),
        }
    }

    /// Name of the message type this marshaller produces.
    pub fn message_type(&self) -> &'static str {
        self.codec.type_name()
    }

    pub fn serialize(&self, message: &AnyMessage) -> Result<Bytes, EncodeError> {
        self.codec.encode_any(message)
    }

    /// Consumes everything remaining in `stream`.
    pub fn deserialize(&self, mut stream: impl Buf) -> Result<AnyMessage, DecodeError> {
        let bytes = stream.copy_to_bytes(stream.remaining());
        self.codec.decode_any(&bytes)
    }
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Marshaller")
            .field(&self.message_type())
            .finish()
    }
}
