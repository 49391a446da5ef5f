use crate::{
    channel::{Inbound, Outbound},
    service::{ParamKind, Signature},
};
use bindery_core::{AnyMessage, IntoReply, Message, Reply, Status};
use futures_lite::{FutureExt as _, future::Boxed};
use std::{any::type_name, future::Future, sync::Arc};

/// Argument passed to an erased method, in declaration order after the
/// receiver.
#[derive(Debug)]
pub enum Arg {
    Message(AnyMessage),
    Inbound(Inbound<AnyMessage>),
    Outbound(Outbound<AnyMessage>),
}

/// Calls one declared method on a service instance.
pub type Invoker<S> = Arc<dyn Fn(Arc<S>, Vec<Arg>) -> Boxed<anyhow::Result<Reply>> + Send + Sync>;

/// A handler parameter the binder knows how to supply.
pub trait Param: Sized + Send + 'static {
    const KIND: ParamKind;

    fn from_arg(arg: Arg) -> anyhow::Result<Self>;
}

impl<T: Message> Param for T {
    const KIND: ParamKind = ParamKind::Message;

    fn from_arg(arg: Arg) -> anyhow::Result<Self> {
        match arg {
            Arg::Message(message) => T::from_any(message).map_err(|_| {
                anyhow::Error::from(Status::internal(format!(
                    "request is not a {}",
                    type_name::<T>()
                )))
            }),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl<T: Message> Param for Inbound<T> {
    const KIND: ParamKind = ParamKind::Inbound;

    fn from_arg(arg: Arg) -> anyhow::Result<Self> {
        match arg {
            Arg::Inbound(inbound) => Ok(inbound.cast()),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

impl<T: Message> Param for Outbound<T> {
    const KIND: ParamKind = ParamKind::Outbound;

    fn from_arg(arg: Arg) -> anyhow::Result<Self> {
        match arg {
            Arg::Outbound(outbound) => Ok(outbound.cast()),
            other => Err(unexpected::<Self>(&other)),
        }
    }
}

fn unexpected<T>(arg: &Arg) -> anyhow::Error {
    Status::internal(format!("cannot pass {arg:?} as {}", type_name::<T>())).into()
}

fn take<const N: usize>(args: Vec<Arg>) -> anyhow::Result<[Arg; N]> {
    let len = args.len();
    let args: Result<[Arg; N], _> = args.try_into();
    args.map_err(|_| {
        anyhow::Error::from(Status::internal(format!(
            "expected {N} arguments, got {len}"
        )))
    })
}

/// A service method, typed by its parameter tuple.
///
/// Implemented for async functions taking the service as `Arc<S>` plus one or
/// two [`Param`]s and returning `anyhow::Result` of a message or `()`. The
/// reply kind is part of the signature, so a shape that answers through an
/// outbound channel must return `()`.
pub trait Handler<S, T>: Send + Sync + Sized + 'static {
    fn signature() -> Signature;

    fn into_invoker(self) -> Invoker<S>;
}

impl<S, F, Fut, A, R> Handler<S, (A,)> for F
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    A: Param,
    R: IntoReply,
{
    fn signature() -> Signature {
        Signature::new([ParamKind::Receiver, A::KIND], R::KIND)
    }

    fn into_invoker(self) -> Invoker<S> {
        Arc::new(move |service: Arc<S>, args: Vec<Arg>| {
            let call = take::<1>(args)
                .and_then(|[a]| A::from_arg(a))
                .map(|a| self(service, a));
            async move { anyhow::Ok(call?.await?.into_reply()) }.boxed()
        })
    }
}

impl<S, F, Fut, A, B, R> Handler<S, (A, B)> for F
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, A, B) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    A: Param,
    B: Param,
    R: IntoReply,
{
    fn signature() -> Signature {
        Signature::new([ParamKind::Receiver, A::KIND, B::KIND], R::KIND)
    }

    fn into_invoker(self) -> Invoker<S> {
        Arc::new(move |service: Arc<S>, args: Vec<Arg>| {
            let call = take::<2>(args).and_then(|[a, b]| {
                let (a, b) = (A::from_arg(a)?, B::from_arg(b)?);
                anyhow::Ok(self(service, a, b))
            });
            async move { anyhow::Ok(call?.await?.into_reply()) }.boxed()
        })
    }
}
