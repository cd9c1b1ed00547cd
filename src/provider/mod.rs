mod types;

pub mod echo;
pub mod http;

pub use types::{Backend, GenerationParameters, Operation, Request, StreamUnit};

use crate::error::StreamTransportError;
use futures::stream::BoxStream;

/// Decoded units of one response, in server order. Ends after the last unit
/// or after the first error.
pub type UnitStream = BoxStream<'static, Result<StreamUnit, StreamTransportError>>;

/// Provider interface.
///
/// `open_stream` must be lazy: nothing is sent until the stream is first
/// polled. Each call starts a new exchange; a finished stream is never
/// restarted.
pub trait Provider {
    fn name(&self) -> &'static str;

    fn open_stream(&self, req: Request) -> UnitStream;
}
