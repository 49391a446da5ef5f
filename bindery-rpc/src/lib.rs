//! Binds statically declared services to a dispatch table and bridges
//! channel-style handlers to observer-driven transports.
//!
//! # Examples
//!
//! ```rust
//! use bindery_core::{CodecRegistry, MsgPack};
//! use bindery_rpc::{Binder, Interface, LoopbackServer, RpcMetadata, RpcService, TaskScope};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl Echo {
//!     async fn echo(self: Arc<Self>, request: String) -> anyhow::Result<String> {
//!         Ok(request)
//!     }
//! }
//!
//! impl RpcService for Echo {
//!     fn interfaces() -> Vec<Interface<Self>> {
//!         vec![Interface::service("Echo").rpc(
//!             "echo",
//!             RpcMetadata {
//!                 path: "/demo.Echo/Echo",
//!                 request_codec: "demo.String#CODEC",
//!                 response_codec: "demo.String#CODEC",
//!             },
//!             Echo::echo,
//!         )]
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = CodecRegistry::builder()
//!         .add("demo.String#CODEC", MsgPack::<String>::new())
//!         .build()?;
//!     let table = Binder::new(registry).bind(Echo)?;
//!
//!     let mut server = LoopbackServer::new(TaskScope::current());
//!     server.add_service(table);
//!
//!     let request = rmp_serde::to_vec_named("hi")?;
//!     let response = server.unary("/demo.Echo/Echo", request.into()).await?;
//!     assert_eq!(rmp_serde::from_slice::<String>(&response)?, "hi");
//!     Ok(())
//! }
//! ```

pub use binder::{Binder, CallHandler, DispatchTable, HandlerBinding, classify};
pub use channel::{ChannelPolicy, Inbound, InboundObserver, Outbound};
pub use handler::{Arg, Handler, Invoker, Param};
pub use loopback::{LoopbackServer, RequestSink, ResponseStream};
pub use observer::{ResponseObserver, StreamObserver};
pub use scope::{CallHandle, TaskScope};
pub use server::{BidiStreamAdapter, ClientStreamAdapter, ServerStreamAdapter, UnaryAdapter};
pub use service::{DeclaredMethod, Interface, ParamKind, RpcMetadata, RpcService, Signature};

pub mod binder;
pub mod channel;
pub mod handler;
pub mod loopback;
pub mod observer;
pub mod scope;
pub mod server;
pub mod service;
#[cfg(test)]
mod tests;
