use bindery_core::{AnyMessage, Status};

/// Callback side of a message stream, driven by whoever produces the values.
///
/// A stream ends with exactly one call to `on_error` or `on_completed`.
/// Nothing is delivered after that.
pub trait StreamObserver: Send + 'static {
    /// An `Err` means the consumer is gone and the producer should stop.
    fn on_next(&mut self, message: AnyMessage) -> Result<(), Status>;

    fn on_error(&mut self, status: Status);

    fn on_completed(&mut self);
}

/// Sink a transport hands to an adapter for the responses of one call.
pub type ResponseObserver = Box<dyn StreamObserver>;

impl<O: StreamObserver + ?Sized> StreamObserver for Box<O> {
    fn on_next(&mut self, message: AnyMessage) -> Result<(), Status> {
        (**self).on_next(message)
    }

    fn on_error(&mut self, status: Status) {
        (**self).on_error(status)
    }

    fn on_completed(&mut self) {
        (**self).on_completed()
    }
}
