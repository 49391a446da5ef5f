use crate::{
    AnyMessage, BindError, Code, CodecRef, CodecRegistry, DecodeError, Marshaller, Message,
    MethodDescriptor, MethodPath, MethodType, MsgPack, RegistryError, ServiceDescriptor, Status,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Input {
    content: String,
}

impl Message for Input {}

fn registry() -> CodecRegistry {
    CodecRegistry::builder()
        .add("test.Input#ADAPTER", MsgPack::<Input>::new())
        .build()
        .unwrap()
}

fn descriptor(path: &str) -> MethodDescriptor {
    let registry = registry();
    MethodDescriptor::new(
        MethodPath::parse(path).unwrap(),
        MethodType::Unary,
        registry.resolve("test.Input#ADAPTER").unwrap(),
        registry.resolve("test.Input#ADAPTER").unwrap(),
    )
}

#[test]
fn test_codec_ref_parse() {
    let reference: CodecRef = "io.hadrien.wire.Input#ADAPTER".parse().unwrap();
    assert_eq!(reference.holder(), "io.hadrien.wire.Input");
    assert_eq!(reference.field(), "ADAPTER");
    assert_eq!(reference.to_string(), "io.hadrien.wire.Input#ADAPTER");

    for bad in ["Input", "#ADAPTER", "Input#", "a#b#c", ""] {
        assert!(
            matches!(
                bad.parse::<CodecRef>(),
                Err(RegistryError::InvalidCodecRef { .. })
            ),
            "{bad} should not parse"
        );
    }
}

#[test]
fn test_registry_rejects_duplicates() {
    let res = CodecRegistry::builder()
        .add("test.Input#ADAPTER", MsgPack::<Input>::new())
        .add("test.Input#ADAPTER", MsgPack::<Input>::new())
        .build();
    assert_eq!(
        res.unwrap_err(),
        RegistryError::DuplicateCodec {
            reference: "test.Input#ADAPTER".into()
        }
    );
}

#[test]
fn test_registry_resolve() {
    let registry = registry();
    assert_eq!(registry.len(), 1);

    let (reference, marshaller) = registry.resolve("test.Input#ADAPTER").unwrap();
    assert_eq!(reference.field(), "ADAPTER");
    assert!(marshaller.message_type().ends_with("Input"));

    assert_eq!(
        registry.resolve("test.Output#ADAPTER").unwrap_err(),
        RegistryError::UnresolvedCodec {
            reference: "test.Output#ADAPTER".into()
        }
    );
}

#[test]
fn test_marshaller_roundtrip() {
    let marshaller = Marshaller::new(MsgPack::<Input>::new());
    let message = Input {
        content: "hello".into(),
    }
    .into_any();

    let bytes = marshaller.serialize(&message).unwrap();
    let decoded = marshaller.deserialize(bytes).unwrap();
    assert_eq!(
        Input::from_any(decoded).unwrap(),
        Input {
            content: "hello".into()
        }
    );
}

#[test]
fn test_marshaller_reports_decode_failure() {
    let marshaller = Marshaller::new(MsgPack::<Input>::new());
    let err = marshaller
        .deserialize(Bytes::from_static(&[0xc1, 0xc1, 0xc1]))
        .unwrap_err();
    assert_eq!(err.len(), 3);
    assert!(err.type_name().ends_with("Input"));

    let cause = std::error::Error::source(&err).unwrap().to_string();
    assert!(!err.to_string().contains(&cause));

    let status = Status::from(err);
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().starts_with("decode "));
    assert_eq!(status.message().matches(cause.as_str()).count(), 1);
}

#[test]
fn test_marshaller_rejects_foreign_message() {
    let marshaller = Marshaller::new(MsgPack::<Input>::new());
    let message: AnyMessage = Box::new(42u32);
    let err = marshaller.serialize(&message).unwrap_err();
    assert!(err.to_string().starts_with("encode "));
    let rendered = format!("{:#}", anyhow::Error::from(err));
    assert_eq!(rendered.matches("is not a").count(), 1);
}

#[test]
fn test_method_path() {
    let path = MethodPath::parse("/pkg.Service/Method").unwrap();
    assert_eq!(path.full_name(), "pkg.Service/Method");
    assert_eq!(path.service(), "pkg.Service");
    assert_eq!(path.method(), "Method");

    let bare = MethodPath::parse("pkg.Service").unwrap();
    assert_eq!(bare.service(), "pkg.Service");
    assert_eq!(bare.method(), "");

    assert!(MethodPath::parse("").is_none());
    assert!(MethodPath::parse("/").is_none());
    assert!(MethodPath::parse("//Method").is_none());
}

#[test]
fn test_service_descriptor_single_service() {
    let service = ServiceDescriptor::from_methods(
        "TestService",
        vec![descriptor("/pkg.Test/A"), descriptor("/pkg.Test/B")],
    )
    .unwrap();
    assert_eq!(service.name(), "pkg.Test");
    assert_eq!(service.methods().len(), 2);
    assert!(service.method("/pkg.Test/B").is_some());
    assert!(service.method("pkg.Test/B").is_some());
    assert!(service.method("pkg.Test/C").is_none());
}

#[test]
fn test_service_descriptor_rejects_mixed_services() {
    let err = ServiceDescriptor::from_methods(
        "TestService",
        vec![descriptor("/pkg.Test/A"), descriptor("/pkg.Other/B")],
    )
    .unwrap_err();
    match err {
        BindError::MultipleServices { services, .. } => {
            assert_eq!(services, vec!["pkg.Other".to_string(), "pkg.Test".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = ServiceDescriptor::from_methods("TestService", vec![]).unwrap_err();
    assert!(matches!(err, BindError::NoServiceName { .. }));
}

#[test]
fn test_status_from_error() {
    let status = Status::from_error(&anyhow::Error::new(Status::cancelled("gone")));
    assert_eq!(status, Status::cancelled("gone"));

    let wrapped = anyhow::Error::new(Status::failed_precondition("nope")).context("while reading");
    assert_eq!(Status::from_error(&wrapped).code(), Code::FailedPrecondition);

    let decode = anyhow::Error::new(DecodeError::new("Input", 2, anyhow::anyhow!("eof")));
    let status = Status::from_error(&decode);
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "decode Input failed (2 bytes): eof");
    assert_eq!(format!("{decode:#}"), "decode Input failed (2 bytes): eof");

    let other = Status::from_error(&anyhow::anyhow!("boom"));
    assert_eq!(other.code(), Code::Unknown);
    assert_eq!(other.message(), "boom");
}
