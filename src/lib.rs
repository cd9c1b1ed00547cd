//! Streams generated text from a remote endpoint into an editor panel.
//!
//! - [`decoder`]: bytes to newline-delimited units
//! - [`provider`]: one lazy HTTP exchange per request, as a stream of units
//! - [`session`]: "latest request wins" bookkeeping in front of the
//!   [`sink`]

pub mod config;
pub mod decoder;
pub mod error;
pub mod provider;
pub mod session;
pub mod sink;

pub use config::{Config, Settings};
pub use decoder::LineDecoder;
pub use error::{ConfigurationError, StreamTransportError};
pub use provider::{Operation, Provider, Request, StreamUnit};
pub use session::{Session, SessionController, SessionState};
pub use sink::{MemorySink, OutputSink, Update, UpdateKind};
