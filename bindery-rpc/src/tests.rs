use crate::{
    BidiStreamAdapter, Binder, ChannelPolicy, ClientStreamAdapter, DeclaredMethod, Inbound,
    Interface, Invoker, LoopbackServer, Outbound, ParamKind, ResponseObserver, RpcMetadata,
    RpcService, ServerStreamAdapter, Signature, StreamObserver, TaskScope, classify,
};
use async_channel::{Receiver, Sender};
use bindery_core::{
    AnyMessage, BindError, Code, Codec, CodecRegistry, Message, MethodType, MsgPack, RegistryError,
    Reply, ReplyKind, Status,
};
use bytes::Bytes;
use futures_lite::{FutureExt as _, StreamExt as _};
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

const INPUT: &str = "test.Input#ADAPTER";
const OUTPUT: &str = "test.Output#ADAPTER";

#[derive(Debug, Serialize, Deserialize)]
struct Input {
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Output {
    content: String,
}

impl Message for Input {}

impl Message for Output {}

fn output(content: impl Into<String>) -> Output {
    Output {
        content: content.into(),
    }
}

fn meta(path: &'static str) -> RpcMetadata {
    RpcMetadata {
        path,
        request_codec: INPUT,
        response_codec: OUTPUT,
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn binder() -> Binder {
    let registry = CodecRegistry::builder()
        .add(INPUT, MsgPack::<Input>::new())
        .add(OUTPUT, MsgPack::<Output>::new())
        .build()
        .unwrap();
    Binder::new(registry)
}

fn encode(content: &str) -> Bytes {
    MsgPack::<Input>::new()
        .encode(&Input {
            content: content.into(),
        })
        .unwrap()
}

fn decode(bytes: &[u8]) -> String {
    MsgPack::<Output>::new().decode(bytes).unwrap().content
}

#[derive(Default)]
struct TestService {
    calls: AtomicUsize,
}

impl TestService {
    async fn unary(self: Arc<Self>, request: Input) -> anyhow::Result<Output> {
        Ok(output(request.content))
    }

    async fn outbound(self: Arc<Self>, request: Input, response: Outbound<Output>) -> anyhow::Result<()> {
        for _ in 0..2 {
            response.send(output(request.content.clone())).await?;
        }
        Ok(())
    }

    async fn inbound(self: Arc<Self>, mut request: Inbound<Input>) -> anyhow::Result<Output> {
        let mut content = String::new();
        while let Some(input) = request.recv().await? {
            content += &input.content;
        }
        Ok(output(content))
    }

    async fn inbound_outbound(
        self: Arc<Self>,
        mut request: Inbound<Input>,
        response: Outbound<Output>,
    ) -> anyhow::Result<()> {
        let mut content = String::new();
        while let Some(input) = request.recv().await? {
            content += &input.content;
            for _ in 0..2 {
                response.send(output(content.clone())).await?;
            }
        }
        Ok(())
    }

    async fn failing_outbound(
        self: Arc<Self>,
        request: Input,
        response: Outbound<Output>,
    ) -> anyhow::Result<()> {
        response.send(output("one")).await?;
        response.send(output("two")).await?;
        Err(Status::failed_precondition(format!("gave up on {}", request.content)).into())
    }

    async fn explode(self: Arc<Self>, _request: Input) -> anyhow::Result<Output> {
        panic!("boom")
    }

    async fn count(self: Arc<Self>, _request: Input) -> anyhow::Result<Output> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(output(calls.to_string()))
    }

    async fn local(self: Arc<Self>, request: Input) -> anyhow::Result<Output> {
        self.unary(request).await
    }
}

impl RpcService for TestService {
    fn interfaces() -> Vec<Interface<Self>> {
        vec![
            Interface::plain("Default"),
            Interface::service("TestGrpcService")
                .rpc("Unary", meta("/test.TestService/Unary"), Self::unary)
                .rpc("Outbound", meta("/test.TestService/Outbound"), Self::outbound)
                .rpc("Inbound", meta("/test.TestService/Inbound"), Self::inbound)
                .rpc(
                    "InboundOutbound",
                    meta("/test.TestService/InboundOutbound"),
                    Self::inbound_outbound,
                )
                .rpc(
                    "FailingOutbound",
                    meta("/test.TestService/FailingOutbound"),
                    Self::failing_outbound,
                )
                .rpc("Explode", meta("/test.TestService/Explode"), Self::explode)
                .rpc("Count", meta("/test.TestService/Count"), Self::count)
                .method("local", Self::local),
        ]
    }
}

fn server() -> LoopbackServer {
    init_logging();
    let table = binder().bind(TestService::default()).unwrap();
    let mut server = LoopbackServer::new(TaskScope::current());
    server.add_service(table);
    server
}

#[tokio::test]
async fn test_unary() {
    let server = server();
    let response = server
        .unary("/test.TestService/Unary", encode("testUnary"))
        .await
        .unwrap();
    assert_eq!(decode(&response), "testUnary");
}

#[tokio::test]
async fn test_client_stream() {
    let server = server();
    let response = server
        .client_streaming(
            "/test.TestService/Inbound",
            ["message1", "message2", "message3"].map(encode),
        )
        .await
        .unwrap();
    assert_eq!(decode(&response), "message1message2message3");

    let response = server
        .client_streaming("test.TestService/Inbound", ["a", "b", "c"].map(encode))
        .await
        .unwrap();
    assert_eq!(decode(&response), "abc");
}

#[tokio::test]
async fn test_server_stream() {
    let server = server();
    let responses = server
        .server_streaming("/test.TestService/Outbound", encode("message"))
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let responses = responses.iter().map(|r| decode(r)).collect::<Vec<_>>();
    assert_eq!(responses, ["message", "message"]);
}

#[tokio::test]
async fn test_bidi_stream() {
    let server = server();
    let (mut requests, mut responses) = server
        .bidi_streaming("/test.TestService/InboundOutbound")
        .unwrap();

    requests.send(encode("x")).await.unwrap();
    // responses flow before the request stream ends
    for _ in 0..2 {
        let response = responses.next().await.unwrap().unwrap();
        assert_eq!(decode(&response), "x");
    }

    requests.send(encode("y")).await.unwrap();
    requests.complete();
    let rest = responses.collect_all().await.unwrap();
    let rest = rest.iter().map(|r| decode(r)).collect::<Vec<_>>();
    assert_eq!(rest, ["xy", "xy"]);
}

#[tokio::test]
async fn test_bidi_stream_batch() {
    let server = server();
    let (mut requests, responses) = server
        .bidi_streaming("/test.TestService/InboundOutbound")
        .unwrap();
    requests.send(encode("message1")).await.unwrap();
    requests.send(encode("message2")).await.unwrap();
    requests.complete();

    let responses = responses.collect_all().await.unwrap();
    let responses = responses.iter().map(|r| decode(r)).collect::<Vec<_>>();
    assert_eq!(
        responses,
        [
            "message1",
            "message1",
            "message1message2",
            "message1message2"
        ]
    );
}

#[tokio::test]
async fn test_server_stream_failure_after_values() {
    let server = server();
    let mut responses = server
        .server_streaming("/test.TestService/FailingOutbound", encode("it"))
        .unwrap();

    assert_eq!(decode(&responses.next().await.unwrap().unwrap()), "one");
    assert_eq!(decode(&responses.next().await.unwrap().unwrap()), "two");
    let status = responses.next().await.unwrap().unwrap_err();
    assert_eq!(status, Status::failed_precondition("gave up on it"));
    assert!(responses.next().await.is_none());
}

#[tokio::test]
async fn test_handler_panic_is_internal() {
    let server = server();
    let status = server
        .unary("/test.TestService/Explode", encode("x"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);

    // the server keeps serving
    let response = server
        .unary("/test.TestService/Unary", encode("still here"))
        .await
        .unwrap();
    assert_eq!(decode(&response), "still here");
}

#[tokio::test]
async fn test_routing_errors() {
    let server = server();

    let status = server
        .unary("/test.TestService/Missing", encode("x"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let status = server
        .unary("/test.TestService/Outbound", encode("x"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let status = server
        .unary("/test.TestService/local", encode("x"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    let status = server
        .unary("/test.TestService/Unary", Bytes::from_static(&[0xc1]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_bad_request_in_stream() {
    let server = server();
    let status = server
        .client_streaming(
            "/test.TestService/Inbound",
            [encode("a"), Bytes::from_static(&[0xc1]), encode("b")],
        )
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_rebind_is_independent() {
    init_logging();
    let binder = binder();
    let mut first = LoopbackServer::new(TaskScope::current());
    first.add_service(binder.bind(TestService::default()).unwrap());
    let mut second = LoopbackServer::new(TaskScope::current());
    second.add_service(binder.bind(TestService::default()).unwrap());

    let path = "/test.TestService/Count";
    first.unary(path, encode("")).await.unwrap();
    let response = first.unary(path, encode("")).await.unwrap();
    assert_eq!(decode(&response), "2");

    let response = second.unary(path, encode("")).await.unwrap();
    assert_eq!(decode(&response), "1");
}

#[test]
fn test_describe() {
    let descriptor = binder().describe::<TestService>().unwrap();
    assert_eq!(descriptor.name(), "test.TestService");
    assert_eq!(descriptor.methods().len(), 7);

    let kinds = descriptor
        .methods()
        .iter()
        .map(|method| (method.path().method(), method.method_type()))
        .collect::<Vec<_>>();
    assert_eq!(
        kinds[..4],
        [
            ("Unary", MethodType::Unary),
            ("Outbound", MethodType::ServerStreaming),
            ("Inbound", MethodType::ClientStreaming),
            ("InboundOutbound", MethodType::BidiStreaming),
        ]
    );

    let table = binder().bind(TestService::default()).unwrap();
    assert_eq!(table.len(), 7);
    assert!(table.lookup("/test.TestService/Inbound").is_some());
    assert!(table.lookup("test.TestService/Inbound").is_some());
    assert!(table.lookup("test.TestService/local").is_none());
    assert_eq!(
        table.iter().next().unwrap().handler().method_type(),
        MethodType::Unary
    );
}

#[test]
fn test_classify() {
    use ParamKind as P;
    use ReplyKind as R;
    let shape = |params: &[ParamKind], reply| classify(&Signature::new(params, reply));

    assert_eq!(shape(&[P::Receiver, P::Message], R::Message), Some(MethodType::Unary));
    assert_eq!(
        shape(&[P::Receiver, P::Inbound], R::Message),
        Some(MethodType::ClientStreaming)
    );
    assert_eq!(
        shape(&[P::Receiver, P::Message, P::Outbound], R::Unit),
        Some(MethodType::ServerStreaming)
    );
    assert_eq!(
        shape(&[P::Receiver, P::Inbound, P::Outbound], R::Unit),
        Some(MethodType::BidiStreaming)
    );

    assert_eq!(shape(&[P::Receiver], R::Message), None);
    assert_eq!(shape(&[P::Receiver, P::Outbound], R::Unit), None);
    assert_eq!(shape(&[P::Receiver, P::Inbound, P::Message], R::Unit), None);
    assert_eq!(shape(&[P::Message, P::Message], R::Message), None);
    assert_eq!(
        shape(&[P::Receiver, P::Message, P::Outbound, P::Outbound], R::Unit),
        None
    );

    // the reply kind has to fit the shape
    assert_eq!(shape(&[P::Receiver, P::Message], R::Unit), None);
    assert_eq!(shape(&[P::Receiver, P::Inbound], R::Unit), None);
    assert_eq!(shape(&[P::Receiver, P::Message, P::Outbound], R::Message), None);
    assert_eq!(shape(&[P::Receiver, P::Inbound, P::Outbound], R::Message), None);
}

const SPLIT: u8 = 0;
const AMBIGUOUS: u8 = 1;
const BARE: u8 = 2;
const SHAPELESS: u8 = 3;
const DUPLICATE: u8 = 4;
const BAD_PATH: u8 = 5;
const UNRESOLVED: u8 = 6;
const LOCAL_ONLY: u8 = 7;
const UNIT_UNARY: u8 = 8;
const UNIT_CLIENT_STREAM: u8 = 9;
const MESSAGE_SERVER_STREAM: u8 = 10;
const MESSAGE_BIDI_STREAM: u8 = 11;

struct Fixture<const CASE: u8>;

impl<const CASE: u8> Fixture<CASE> {
    async fn echo(self: Arc<Self>, request: Input) -> anyhow::Result<Output> {
        Ok(output(request.content))
    }

    async fn nothing(self: Arc<Self>, _request: Input) -> anyhow::Result<()> {
        Ok(())
    }

    async fn drain(self: Arc<Self>, mut requests: Inbound<Input>) -> anyhow::Result<()> {
        while requests.recv().await?.is_some() {}
        Ok(())
    }

    async fn answer_stream(
        self: Arc<Self>,
        request: Input,
        _responses: Outbound<Output>,
    ) -> anyhow::Result<Output> {
        Ok(output(request.content))
    }

    async fn answer_bidi(
        self: Arc<Self>,
        _requests: Inbound<Input>,
        _responses: Outbound<Output>,
    ) -> anyhow::Result<Output> {
        Ok(output("last"))
    }
}

impl<const CASE: u8> RpcService for Fixture<CASE> {
    fn interfaces() -> Vec<Interface<Self>> {
        match CASE {
            SPLIT => vec![
                Interface::service("Split")
                    .rpc("A", meta("/test.One/A"), Self::echo)
                    .rpc("B", meta("/test.Two/B"), Self::echo),
            ],
            AMBIGUOUS => vec![
                Interface::service("First").rpc("A", meta("/test.First/A"), Self::echo),
                Interface::plain("Other").method("echo", Self::echo),
                Interface::service("Second").rpc("B", meta("/test.Second/B"), Self::echo),
            ],
            BARE => vec![Interface::plain("Bare").method("echo", Self::echo)],
            SHAPELESS => {
                let invoker: Invoker<Self> = Arc::new(|_: Arc<Self>, _: Vec<crate::Arg>| {
                    async { anyhow::Ok(Reply::Unit) }.boxed()
                });
                vec![
                    Interface::service("Shapeless")
                        .rpc("Echo", meta("/test.Shapeless/Echo"), Self::echo)
                        .declare(DeclaredMethod::from_parts(
                            "Broken",
                            Some(meta("/test.Shapeless/Broken")),
                            Signature::new([ParamKind::Receiver, ParamKind::Outbound], ReplyKind::Unit),
                            invoker,
                        )),
                ]
            }
            DUPLICATE => vec![
                Interface::service("Duplicate")
                    .rpc("A", meta("/test.Duplicate/A"), Self::echo)
                    .rpc("B", meta("test.Duplicate/A"), Self::echo),
            ],
            BAD_PATH => vec![Interface::service("BadPath").rpc("A", meta("/"), Self::echo)],
            UNRESOLVED => vec![Interface::service("Unresolved").rpc(
                "A",
                RpcMetadata {
                    path: "/test.Unresolved/A",
                    request_codec: "test.Missing#ADAPTER",
                    response_codec: OUTPUT,
                },
                Self::echo,
            )],
            LOCAL_ONLY => vec![Interface::service("LocalOnly").method("echo", Self::echo)],
            UNIT_UNARY => vec![
                Interface::service("UnitUnary").rpc("Nothing", meta("/test.Unit/Nothing"), Self::nothing),
            ],
            UNIT_CLIENT_STREAM => vec![
                Interface::service("UnitClientStream").rpc("Drain", meta("/test.Unit/Drain"), Self::drain),
            ],
            MESSAGE_SERVER_STREAM => vec![Interface::service("MessageServerStream").rpc(
                "AnswerStream",
                meta("/test.Message/AnswerStream"),
                Self::answer_stream,
            )],
            MESSAGE_BIDI_STREAM => vec![Interface::service("MessageBidiStream").rpc(
                "AnswerBidi",
                meta("/test.Message/AnswerBidi"),
                Self::answer_bidi,
            )],
            _ => Vec::new(),
        }
    }
}

#[test]
fn test_bind_rejects_two_services() {
    let err = binder().bind(Fixture::<SPLIT>).unwrap_err();
    match err {
        BindError::MultipleServices {
            interface,
            services,
        } => {
            assert_eq!(interface, "Split");
            assert_eq!(services, ["test.One", "test.Two"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(
        binder()
            .describe::<Fixture<SPLIT>>()
            .unwrap_err()
            .to_string()
            .starts_with("more than one service in interface")
    );
}

#[test]
fn test_interface_resolution() {
    let err = binder().bind(Fixture::<AMBIGUOUS>).unwrap_err();
    assert!(
        matches!(&err, BindError::AmbiguousInterface { candidates, .. } if candidates == &["First", "Second"]),
        "{err}"
    );

    let table = binder()
        .bind_interface(Fixture::<AMBIGUOUS>, "Second")
        .unwrap();
    assert_eq!(table.service_name(), "test.Second");

    let err = binder()
        .bind_interface(Fixture::<AMBIGUOUS>, "Other")
        .unwrap_err();
    assert!(matches!(err, BindError::UnknownInterface { .. }));

    let err = binder().bind(Fixture::<BARE>).unwrap_err();
    assert!(matches!(err, BindError::NoRpcInterface { .. }));

    let descriptor = binder()
        .describe_interface::<Fixture<AMBIGUOUS>>("First")
        .unwrap();
    assert_eq!(descriptor.name(), "test.First");
    assert_eq!(descriptor.methods().len(), 1);
    assert!(matches!(
        binder().describe_interface::<Fixture<AMBIGUOUS>>("Missing"),
        Err(BindError::UnknownInterface { .. })
    ));
}

#[test]
fn test_bind_configuration_errors() {
    let err = binder().bind(Fixture::<SHAPELESS>).unwrap_err();
    assert_eq!(err.to_string(), "unknown method type for `Broken`");

    let err = binder().bind(Fixture::<DUPLICATE>).unwrap_err();
    assert!(matches!(err, BindError::DuplicateMethod { path } if path == "test.Duplicate/A"));

    let err = binder().bind(Fixture::<BAD_PATH>).unwrap_err();
    assert!(matches!(err, BindError::InvalidPath { method: "A", .. }));

    let err = binder().bind(Fixture::<UNRESOLVED>).unwrap_err();
    assert!(matches!(
        err,
        BindError::Codec {
            method: "A",
            source: RegistryError::UnresolvedCodec { .. }
        }
    ));

    let err = binder().bind(Fixture::<LOCAL_ONLY>).unwrap_err();
    assert!(matches!(err, BindError::NoServiceName { interface: "LocalOnly" }));
}

#[test]
fn test_bind_rejects_mismatched_reply() {
    let err = binder().bind(Fixture::<UNIT_UNARY>).unwrap_err();
    assert!(matches!(err, BindError::UnknownMethodType { method: "Nothing" }), "{err}");

    let err = binder().bind(Fixture::<UNIT_CLIENT_STREAM>).unwrap_err();
    assert!(matches!(err, BindError::UnknownMethodType { method: "Drain" }), "{err}");

    let err = binder().bind(Fixture::<MESSAGE_SERVER_STREAM>).unwrap_err();
    assert!(
        matches!(err, BindError::UnknownMethodType { method: "AnswerStream" }),
        "{err}"
    );

    let err = binder().describe::<Fixture<MESSAGE_BIDI_STREAM>>().unwrap_err();
    assert_eq!(err.to_string(), "unknown method type for `AnswerBidi`");
}

#[derive(Debug, PartialEq)]
enum Seen {
    Next(String),
    Error(Code),
    Completed,
}

struct Recorder {
    events: Sender<Seen>,
    reject: bool,
}

impl StreamObserver for Recorder {
    fn on_next(&mut self, message: AnyMessage) -> Result<(), Status> {
        if self.reject {
            return Err(Status::cancelled("peer gone"));
        }
        let message = String::from_any(message).map_err(|_| Status::internal("not a string"))?;
        let _ = self.events.try_send(Seen::Next(message));
        Ok(())
    }

    fn on_error(&mut self, status: Status) {
        let _ = self.events.try_send(Seen::Error(status.code()));
    }

    fn on_completed(&mut self) {
        let _ = self.events.try_send(Seen::Completed);
    }
}

fn recorder(reject: bool) -> (ResponseObserver, Receiver<Seen>) {
    let (events, seen) = async_channel::unbounded();
    (Box::new(Recorder { events, reject }), seen)
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn summarize(mut requests: Inbound<String>) -> anyhow::Result<String> {
    let mut seen = Vec::new();
    loop {
        match requests.recv().await {
            Ok(Some(request)) => seen.push(request),
            Ok(None) => return Ok(seen.join(",")),
            Err(status) => {
                let after = requests.recv().await;
                return Ok(format!(
                    "{}|{}|{}",
                    seen.join(","),
                    status.code(),
                    matches!(after, Ok(None))
                ));
            }
        }
    }
}

async fn ignore(_requests: Inbound<String>) -> anyhow::Result<String> {
    Ok("done".to_string())
}

async fn stall(requests: Inbound<String>) -> anyhow::Result<String> {
    let _requests = requests;
    std::future::pending().await
}

async fn tick_then_stall(request: String, responses: Outbound<String>) -> anyhow::Result<()> {
    responses.send(request).await?;
    std::future::pending().await
}

async fn flood(_request: String, responses: Outbound<String>, _guard: SetOnDrop) -> anyhow::Result<()> {
    loop {
        responses.send("x".to_string()).await?;
    }
}

#[tokio::test]
async fn test_inbound_error_reaches_handler_once() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = ClientStreamAdapter::<String, String>::new(summarize);
    let (response, seen) = recorder(false);
    let (mut inbound, call) = adapter.invoke(&scope, response);

    inbound.on_next(Box::new("a".to_string())).unwrap();
    inbound.on_next(Box::new("b".to_string())).unwrap();
    inbound.on_error(Status::failed_precondition("transport broke"));
    call.join().await;

    assert_eq!(
        seen.recv().await.unwrap(),
        Seen::Next("a,b|failed precondition|true".to_string())
    );
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);
}

#[tokio::test]
async fn test_finished_handler_rejects_inbound() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = ClientStreamAdapter::<String, String>::new(ignore);
    let (response, seen) = recorder(false);
    let (mut inbound, call) = adapter.invoke(&scope, response);
    call.join().await;

    assert_eq!(seen.recv().await.unwrap(), Seen::Next("done".to_string()));
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);

    let status = inbound.on_next(Box::new("late".to_string())).unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);
    assert!(inbound.is_closed());
}

#[tokio::test]
async fn test_bounded_inbound_does_not_block() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = ClientStreamAdapter::<String, String>::new(stall).with_policy(ChannelPolicy {
        inbound: Some(1),
        outbound: 1,
    });
    let (response, seen) = recorder(false);
    let (mut inbound, call) = adapter.invoke(&scope, response);

    inbound.on_next(Box::new("a".to_string())).unwrap();
    let status = inbound.on_next(Box::new("b".to_string())).unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);

    call.cancel();
    call.join().await;
    assert_eq!(seen.recv().await.unwrap(), Seen::Error(Code::Cancelled));
}

#[tokio::test]
async fn test_cancel_call() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = ServerStreamAdapter::<String, String>::new(tick_then_stall);
    let (response, seen) = recorder(false);
    let call = adapter.invoke(&scope, Box::new("tick".to_string()), response);

    assert_eq!(seen.recv().await.unwrap(), Seen::Next("tick".to_string()));
    assert!(!call.is_finished());
    assert_eq!(scope.active_calls(), 1);

    call.cancel();
    call.join().await;
    assert_eq!(seen.recv().await.unwrap(), Seen::Error(Code::Cancelled));
    assert!(seen.recv().await.is_err());
    assert_eq!(scope.active_calls(), 0);
}

#[tokio::test]
async fn test_rejecting_sink_cancels_handler() {
    init_logging();
    let scope = TaskScope::current();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let adapter = ServerStreamAdapter::<String, String>::new(move |request, responses| {
        flood(request, responses, SetOnDrop(flag.clone()))
    });
    let (response, seen) = recorder(true);
    let call = adapter.invoke(&scope, Box::new("go".to_string()), response);
    call.join().await;

    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(seen.recv().await.unwrap(), Seen::Error(Code::Cancelled));
    assert!(seen.recv().await.is_err());
}

#[tokio::test]
async fn test_shutdown() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = ServerStreamAdapter::<String, String>::new(tick_then_stall);

    let (response, seen) = recorder(false);
    let call = adapter.invoke(&scope, Box::new("tick".to_string()), response);
    assert_eq!(seen.recv().await.unwrap(), Seen::Next("tick".to_string()));

    scope.shutdown();
    call.join().await;
    assert_eq!(seen.recv().await.unwrap(), Seen::Error(Code::Cancelled));

    let (response, seen) = recorder(false);
    let call = adapter.invoke(&scope, Box::new("late".to_string()), response);
    assert!(call.is_finished());
    assert_eq!(seen.recv().await.unwrap(), Seen::Error(Code::Unavailable));
    assert_eq!(scope.active_calls(), 0);
}

async fn numbered(request: String, responses: Outbound<String>) -> anyhow::Result<()> {
    for i in 1..=3 {
        responses.send(format!("{request}{i}")).await?;
    }
    Ok(())
}

async fn echo_once(request: String, responses: Outbound<String>) -> anyhow::Result<()> {
    responses.send(request).await?;
    Ok(())
}

async fn echo_each(mut requests: Inbound<String>, responses: Outbound<String>) -> anyhow::Result<()> {
    while let Some(request) = requests.recv().await? {
        responses.send(request).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_server_stream_completes_once() {
    init_logging();
    let scope = TaskScope::current();

    let adapter = ServerStreamAdapter::<String, String>::new(numbered);
    let (response, seen) = recorder(false);
    let call = adapter.invoke(&scope, Box::new("v".to_string()), response);
    call.join().await;

    for expected in ["v1", "v2", "v3"] {
        assert_eq!(seen.recv().await.unwrap(), Seen::Next(expected.to_string()));
    }
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);
    assert!(seen.recv().await.is_err());

    let adapter = ServerStreamAdapter::<String, String>::new(echo_once);
    let (response, seen) = recorder(false);
    let call = adapter.invoke(&scope, Box::new("only".to_string()), response);
    call.join().await;

    assert_eq!(seen.recv().await.unwrap(), Seen::Next("only".to_string()));
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);
    assert!(seen.recv().await.is_err());
}

#[tokio::test]
async fn test_bidi_stream_completes_once() {
    init_logging();
    let scope = TaskScope::current();
    let adapter = BidiStreamAdapter::<String, String>::new(echo_each);

    let (response, seen) = recorder(false);
    let (mut inbound, call) = adapter.invoke(&scope, response);
    inbound.on_next(Box::new("only".to_string())).unwrap();
    inbound.on_completed();
    call.join().await;

    assert_eq!(seen.recv().await.unwrap(), Seen::Next("only".to_string()));
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);
    assert!(seen.recv().await.is_err());

    let (response, seen) = recorder(false);
    let (mut inbound, call) = adapter.invoke(&scope, response);
    for request in ["x", "y", "z"] {
        inbound.on_next(Box::new(request.to_string())).unwrap();
    }
    inbound.on_completed();
    call.join().await;

    for expected in ["x", "y", "z"] {
        assert_eq!(seen.recv().await.unwrap(), Seen::Next(expected.to_string()));
    }
    assert_eq!(seen.recv().await.unwrap(), Seen::Completed);
    assert!(seen.recv().await.is_err());
}

#[tokio::test]
async fn test_request_error_mid_bidi_stream() {
    let server = server();
    let (mut requests, mut responses) = server
        .bidi_streaming("/test.TestService/InboundOutbound")
        .unwrap();

    requests.send(encode("x")).await.unwrap();
    for _ in 0..2 {
        assert_eq!(decode(&responses.next().await.unwrap().unwrap()), "x");
    }

    requests.error(Status::failed_precondition("transport broke"));
    let status = responses.next().await.unwrap().unwrap_err();
    assert_eq!(status, Status::failed_precondition("transport broke"));
    assert!(responses.next().await.is_none());
}
