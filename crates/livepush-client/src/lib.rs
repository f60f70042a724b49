//! # livepush-client
//!
//! Persistent client for the live platform's open-push service.
//!
//! [`LivePushClient`] opens a session over the signed HTTP API, connects and
//! authenticates the push socket, and publishes decoded [`LiveEvent`]s on a
//! broadcast channel. Lost links are rebuilt by the reconnect engine with
//! exponential backoff; a platform `INTERACTION_END` triggers a full reload.
//!
//! ```no_run
//! # async fn run() -> livepush_client::Result<()> {
//! use livepush_client::LivePushClient;
//! use livepush_settings::load_settings;
//!
//! let client = LivePushClient::new(load_settings().unwrap_or_default())?;
//! let mut events = client.subscribe();
//! client.start("IDENTITY-CODE").await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.summary());
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`LiveEvent`]: livepush_core::LiveEvent

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod signer;
pub mod state;

pub use client::{ClientStats, LivePushClient};
pub use error::{ClientError, ErrorKind, Result};
pub use reconnect::{LinkEstablisher, ReconnectEngine};
pub use session::{ConnectParams, SessionManager};
pub use signer::RequestSigner;
pub use state::ConnectionState;
