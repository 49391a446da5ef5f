use crate::DecodeError;
use derive_more::Display;
use std::borrow::Cow;

/// Status codes reported to the transport when a call ends.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum Code {
    #[display("ok")]
    Ok = 0,
    #[display("cancelled")]
    Cancelled = 1,
    #[display("unknown")]
    Unknown = 2,
    #[display("invalid argument")]
    InvalidArgument = 3,
    #[display("resource exhausted")]
    ResourceExhausted = 8,
    #[display("failed precondition")]
    FailedPrecondition = 9,
    #[display("unimplemented")]
    Unimplemented = 12,
    #[display("internal")]
    Internal = 13,
    #[display("unavailable")]
    Unavailable = 14,
}

/// Call-level error delivered through a response observer.
#[derive(Debug, Display, Clone, PartialEq, Eq, derive_more::Error)]
#[display("{code}: {message}")]
pub struct Status {
    code: Code,
    message: Cow<'static, str>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn resource_exhausted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Translates a handler failure into a status.
    ///
    /// A `Status` anywhere in the chain wins, decode failures become
    /// `InvalidArgument`, everything else is `Unknown`.
    pub fn from_error(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(status) = cause.downcast_ref::<Status>() {
                return status.clone();
            }
            if cause.is::<DecodeError>() {
                return Status::invalid_argument(render(cause));
            }
        }
        Status::unknown(format!("{error:#}"))
    }
}

impl From<DecodeError> for Status {
    fn from(error: DecodeError) -> Self {
        Status::invalid_argument(render(&error))
    }
}

/// `error: cause: ...`, each level once.
fn render(error: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(error), |error| error.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

impl From<anyhow::Error> for Status {
    fn from(error: anyhow::Error) -> Self {
        Status::from_error(&error)
    }
}
