use std::any::Any;

/// A message with its concrete type erased, as carried through dispatch tables
/// and channels.
pub type AnyMessage = Box<dyn Any + Send>;

/// Marker for types that can travel through an rpc call.
///
/// The default conversions box and downcast; `AnyMessage` itself converts as
/// the identity so erased handlers can use the same channel types as typed ones.
pub trait Message: Send + 'static {
    fn into_any(self) -> AnyMessage
    where
        Self: Sized,
    {
        Box::new(self)
    }

    /// Returns the original message back when it holds a different type.
    fn from_any(message: AnyMessage) -> Result<Self, AnyMessage>
    where
        Self: Sized,
    {
        message.downcast::<Self>().map(|message| *message)
    }
}

impl Message for AnyMessage {
    fn into_any(self) -> AnyMessage {
        self
    }

    fn from_any(message: AnyMessage) -> Result<Self, AnyMessage> {
        Ok(message)
    }
}

impl Message for String {}

impl Message for bytes::Bytes {}

/// What a handler hands back: a response message, or nothing for the shapes
/// that answer through an outbound channel.
#[derive(Debug)]
pub enum Reply {
    Message(AnyMessage),
    Unit,
}

impl Reply {
    pub fn into_message(self) -> Result<AnyMessage, crate::Status> {
        match self {
            Reply::Message(message) => Ok(message),
            Reply::Unit => Err(crate::Status::internal("handler produced no response")),
        }
    }
}

/// Whether a handler answers with a message or with nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Message,
    Unit,
}

pub trait IntoReply: Send + 'static {
    const KIND: ReplyKind;

    fn into_reply(self) -> Reply;
}

impl<T: Message> IntoReply for T {
    const KIND: ReplyKind = ReplyKind::Message;

    fn into_reply(self) -> Reply {
        Reply::Message(self.into_any())
    }
}

impl IntoReply for () {
    const KIND: ReplyKind = ReplyKind::Unit;

    fn into_reply(self) -> Reply {
        Reply::Unit
    }
}
