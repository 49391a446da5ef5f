use crate::Message;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;

/// A message codec supplied from outside: turns one message type into bytes
/// and back.
pub trait Codec: Send + Sync + 'static {
    type Message: Message;

    fn encode(&self, message: &Self::Message) -> anyhow::Result<Bytes>;

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Self::Message>;
}

/// MessagePack codec for any serde message.
pub struct MsgPack<T> {
    _message: PhantomData<fn() -> T>,
}

impl<T> MsgPack<T> {
    pub const fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<T> Default for MsgPack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec for MsgPack<T>
where
    T: Message + Serialize + DeserializeOwned,
{
    type Message = T;

    fn encode(&self, message: &T) -> anyhow::Result<Bytes> {
        Ok(rmp_serde::to_vec_named(message)?.into())
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
