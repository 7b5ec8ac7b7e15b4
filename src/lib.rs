//! Real-time audio bridge from a render callback to a streaming speech
//! endpoint.
//!
//! The bridge moves PCM audio from a hard-real-time render callback to a
//! background worker over a lock-free shared ring buffer, and forwards it in
//! fixed-size chunks to a remote speech/insight endpoint. Conversation
//! events from the endpoint flow back to the application through a single
//! callback.
//!
//! # Architecture
//!
//! ```text
//! render callback          shared memory            worker thread
//! ┌──────────────┐   ┌──────────────────────┐   ┌────────────────┐
//! │ RenderHandle │──▶│ SharedRing           │──▶│ drain + gate   │──▶ StreamingSession
//! │ f32 → PCM16  │   │ control block + ring │   │ PCM16 chunks   │        │
//! └──────────────┘   └──────────────────────┘   └────────────────┘        ▼
//!         ▲                                              │        conversation events
//!         └────────────── BridgeBuilder::start ◀─────────┴──▶ event callback
//! ```
//!
//! The producer side never blocks, locks, or allocates per quantum; it
//! publishes samples with release stores and nudges the worker through a
//! futex-style wake flag. The worker blocks on that flag, drains one kernel
//! of frames at a time and hands each chunk to the [`StreamingSession`].
//! Audio transmission is gated until the remote end reports that it has
//! started listening.
//!
//! # Quick Start
//!
//! ```no_run
//! use audio_bridge::{AudioBridge, BridgeConfig, BridgeEvent, MockSession};
//!
//! # fn main() -> Result<(), audio_bridge::BridgeError> {
//! let mut bridge = AudioBridge::builder()
//!     .config(BridgeConfig::default())
//!     .session(MockSession::new())
//!     .on_event(|event| match event {
//!         BridgeEvent::Conversation { payload } => println!("{payload}"),
//!         other => eprintln!("{other:?}"),
//!     })
//!     .start()?;
//!
//! let mut renderer = bridge.take_renderer().expect("single producer");
//! // Inside the audio callback, once per quantum:
//! renderer.render(&[0.0f32; 128]);
//!
//! bridge.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! With the `ws` feature (default), [`WsSession`] provides the WebSocket
//! transport; [`MockSession`] drives the same machinery without a network.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod config;
mod consumer;
mod controller;
mod error;
mod event;
mod producer;
mod state;

pub mod convert;
pub mod ring;
pub mod session;

pub use config::BridgeConfig;
pub use controller::{AudioBridge, Bridge, BridgeBuilder};
pub use error::{BridgeError, TransportError};
pub use event::{event_callback, BridgeEvent, EventCallback};
pub use producer::RenderHandle;
pub use ring::{ControlBlock, SharedRing, WakeReason};
pub use session::{MockSession, SessionEvent, SessionEventCallback, StreamingSession};
#[cfg(feature = "ws")]
pub use session::{WsSession, WsSessionConfig};
pub use state::{BridgeState, BridgeStats};
