pub use codec::{Codec, MsgPack};
pub use error::{BindError, DecodeError, EncodeError, RegistryError};
pub use marshaller::Marshaller;
pub use message::{AnyMessage, IntoReply, Message, Reply, ReplyKind};
pub use method::{MethodDescriptor, MethodPath, MethodType, ServiceDescriptor};
pub use registry::{CodecRef, CodecRegistry, CodecRegistryBuilder};
pub use status::{Code, Status};

pub mod codec;
pub mod error;
pub mod marshaller;
pub mod message;
pub mod method;
pub mod registry;
pub mod status;
#[cfg(test)]
mod tests;
