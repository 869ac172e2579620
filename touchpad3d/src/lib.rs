//! A host-side protocol engine for combined 2D touch / 3D gesture sensors.
//!
//! The supported devices pair a capacitive touch controller (the 2D
//! subsystem) with an electrical near-field gesture controller (the 3D
//! subsystem). Both are reached over a single transport: either a HID
//! interface exchanging fixed-size packets, which carries messages of both
//! subsystems, or a serial byte stream only carrying 3D messages.
//!
//! This crate implements the protocol on top of such a transport: framing,
//! decoding of measurement data, runtime parameters and firmware updates. The
//! transport itself is left to the application.
//!
//! # Quickstart
//!
//! ## Provide a transport
//!
//! The trait bridging your HID or serial implementation to this crate is
//! [`channel::Transport`]. Its [`kind`](channel::Transport::kind) decides
//! which framing is used.
//!
//! ## Open a session
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use touchpad3d::{
//!     config::{ReceiveMode, SessionConfig},
//!     message::{OutputMask, Parameter2d},
//!     session::Session,
//! };
//!
//! let mut session = Session::new(
//!     Arc::new(my_transport),
//!     SessionConfig {
//!         // Let a reader thread dispatch incoming messages.
//!         receive_mode: ReceiveMode::Background,
//!         ..Default::default()
//!     },
//! );
//! session.open()?;
//!
//! // Malformed device data never fails an operation, but it can be observed.
//! session.set_logger(|line| eprintln!("{line}"));
//!
//! // Runtime parameters are written and acknowledged synchronously.
//! session.set_output_enable_mask(
//!     OutputMask::GESTURE_INFO | OutputMask::POSITION,
//!     OutputMask::POSITION,
//!     OutputMask::OUTPUT_ALL,
//! )?;
//!
//! // Measurement data is accumulated in the background and published on
//! // request. Accessors keep returning the last published snapshot.
//! loop {
//!     if let Some(refresh) = session.retrieve_3d()? {
//!         println!("{:?} ({} skipped)", session.position(), refresh.skipped);
//!     }
//! }
//! ```
//!
//! Every error maps to one of the integer codes in [`error::codes`] through
//! [`HmiError::code`](error::HmiError::code).

pub mod channel;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod framing;
pub mod message;
mod pending;
pub mod sensor3d;
pub mod session;
pub mod touch2d;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{HmiError, Result};
pub use session::{Refresh, Session};
