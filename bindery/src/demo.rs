//! The firmware update service the binary serves, with its messages and the
//! interface a code generator would emit for it.

use crate::config::{Config, DemoConfig};
use bindery_core::{Codec, CodecRegistry, Message, MsgPack};
use bindery_rpc::{
    Binder, DispatchTable, Inbound, Interface, LoopbackServer, Outbound, RpcMetadata, RpcService,
    TaskScope,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, info};

pub const INPUT_ADAPTER: &str = "mikromaskin.firmware.Input#ADAPTER";

pub const OUTPUT_ADAPTER: &str = "mikromaskin.firmware.Output#ADAPTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub content: String,
}

impl Message for Input {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub content: String,
}

impl Message for Output {}

pub trait UpdateService: Send + Sync + 'static {
    fn unary(self: Arc<Self>, request: Input) -> impl Future<Output = anyhow::Result<Output>> + Send;

    fn outbound(
        self: Arc<Self>,
        request: Input,
        response: Outbound<Output>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn inbound(
        self: Arc<Self>,
        request: Inbound<Input>,
    ) -> impl Future<Output = anyhow::Result<Output>> + Send;

    fn inbound_outbound(
        self: Arc<Self>,
        request: Inbound<Input>,
        response: Outbound<Output>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

fn rpc(path: &'static str) -> RpcMetadata {
    RpcMetadata {
        path,
        request_codec: INPUT_ADAPTER,
        response_codec: OUTPUT_ADAPTER,
    }
}

/// Declaration of [`UpdateService`] as a bindable interface.
pub fn update_service<S: UpdateService>() -> Interface<S> {
    Interface::service("UpdateServiceServer")
        .rpc("Unary", rpc("/mikromaskin.firmware.UpdateService/Unary"), S::unary)
        .rpc(
            "Outbound",
            rpc("/mikromaskin.firmware.UpdateService/Outbound"),
            S::outbound,
        )
        .rpc(
            "Inbound",
            rpc("/mikromaskin.firmware.UpdateService/Inbound"),
            S::inbound,
        )
        .rpc(
            "InboundOutbound",
            rpc("/mikromaskin.firmware.UpdateService/InboundOutbound"),
            S::inbound_outbound,
        )
}

pub fn registry() -> anyhow::Result<CodecRegistry> {
    Ok(CodecRegistry::builder()
        .add(INPUT_ADAPTER, MsgPack::<Input>::new())
        .add(OUTPUT_ADAPTER, MsgPack::<Output>::new())
        .build()?)
}

pub struct UpdateServiceImpl {
    repeat: usize,
    pause: Duration,
}

impl UpdateServiceImpl {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            repeat: config.repeat,
            pause: config.pause(),
        }
    }
}

impl Default for UpdateServiceImpl {
    fn default() -> Self {
        Self::new(DemoConfig::default())
    }
}

impl UpdateService for UpdateServiceImpl {
    async fn unary(self: Arc<Self>, request: Input) -> anyhow::Result<Output> {
        info!("unary");
        Ok(Output {
            content: request.content,
        })
    }

    async fn outbound(
        self: Arc<Self>,
        request: Input,
        response: Outbound<Output>,
    ) -> anyhow::Result<()> {
        info!("outbound");
        for i in 1..=self.repeat {
            debug!(i, "sending response");
            response
                .send(Output {
                    content: request.content.clone(),
                })
                .await?;
            tokio::time::sleep(self.pause).await;
        }
        Ok(())
    }

    async fn inbound(self: Arc<Self>, mut request: Inbound<Input>) -> anyhow::Result<Output> {
        info!("inbound");
        let mut content = String::new();
        while let Some(input) = request.recv().await? {
            content += &input.content;
            tokio::time::sleep(self.pause).await;
        }
        Ok(Output { content })
    }

    async fn inbound_outbound(
        self: Arc<Self>,
        mut request: Inbound<Input>,
        response: Outbound<Output>,
    ) -> anyhow::Result<()> {
        info!("inbound outbound");
        let mut content = String::new();
        while let Some(input) = request.recv().await? {
            content += &input.content;
            for _ in 0..self.repeat {
                response
                    .send(Output {
                        content: content.clone(),
                    })
                    .await?;
                tokio::time::sleep(self.pause).await;
            }
        }
        Ok(())
    }
}

impl RpcService for UpdateServiceImpl {
    fn interfaces() -> Vec<Interface<Self>> {
        vec![update_service()]
    }
}

pub fn binder(config: &Config) -> anyhow::Result<Binder> {
    Ok(Binder::new(registry()?).channel_policy(config.channels.policy()))
}

pub fn bind(config: &Config) -> anyhow::Result<DispatchTable> {
    Ok(binder(config)?.bind(UpdateServiceImpl::new(config.demo))?)
}

/// What one round of [`run`] got back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub unary: String,
    pub server_stream: Vec<String>,
    pub client_stream: String,
    pub bidi_stream: Vec<String>,
}

/// Serves the update service in process and calls each method once.
pub async fn run(config: &Config, content: &str) -> anyhow::Result<DemoReport> {
    let mut server = LoopbackServer::new(TaskScope::current());
    server.add_service(bind(config)?);

    let path = |method: &str| format!("/mikromaskin.firmware.UpdateService/{method}");

    let unary = decode(&server.unary(&path("Unary"), encode(content)?).await?)?;
    info!(%unary, "unary returned");

    let server_stream = server
        .server_streaming(&path("Outbound"), encode(content)?)?
        .collect_all()
        .await?
        .iter()
        .map(|bytes| decode(bytes))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!(?server_stream, "outbound returned");

    let requests = (1..=3)
        .map(|i| encode(&format!("{content}{i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let client_stream = decode(&server.client_streaming(&path("Inbound"), requests).await?)?;
    info!(%client_stream, "inbound returned");

    let (mut requests, responses) = server.bidi_streaming(&path("InboundOutbound"))?;
    for i in 1..=2 {
        requests.send(encode(&format!("{content}{i}"))?).await?;
    }
    requests.complete();
    let bidi_stream = responses
        .collect_all()
        .await?
        .iter()
        .map(|bytes| decode(bytes))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!(?bidi_stream, "inbound outbound returned");

    server.shutdown();
    Ok(DemoReport {
        unary,
        server_stream,
        client_stream,
        bidi_stream,
    })
}

fn encode(content: &str) -> anyhow::Result<Bytes> {
    MsgPack::<Input>::new().encode(&Input {
        content: content.to_string(),
    })
}

fn decode(bytes: &[u8]) -> anyhow::Result<String> {
    Ok(MsgPack::<Output>::new().decode(bytes)?.content)
}
