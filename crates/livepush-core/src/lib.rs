//! # livepush-core
//!
//! Transport-independent building blocks of the open-push client:
//!
//! - **Frame codec**: [`frame`] encodes and decodes the 16-byte-header binary
//!   envelope exchanged over the push socket
//! - **Live events**: [`event`] decodes push payloads into the closed
//!   [`LiveEvent`] set
//! - **Backoff**: [`backoff`] computes reconnect delays with bounded jitter
//! - **Logging**: [`logging`] installs the `tracing` subscriber

#![deny(unsafe_code)]

pub mod backoff;
pub mod event;
pub mod frame;
pub mod logging;

pub use backoff::BackoffPolicy;
pub use event::{EventDecodeError, LiveEvent, decode_event};
pub use frame::{DecodeError, Frame, FrameCodec, HEADER_LENGTH, Opcode};
