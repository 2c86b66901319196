//! Listening pipeline: classification, endpointing and barge-in detection.
//!
//! Each worker is a station running in its own thread, connected by bounded
//! crossbeam channels. The engine wires them to capture and to the
//! conversation orchestrator.

pub mod endpointer;
pub mod error;
pub mod interrupt;
pub mod listener;
pub mod station;
pub mod types;
pub mod vad_station;

pub use endpointer::{EndpointState, Endpointer, EndpointerConfig};
pub use error::{ErrorReporter, FatalLatch, LogReporter, StationError};
pub use interrupt::InterruptMonitor;
pub use listener::ListenerStation;
pub use station::{Station, StationRunner};
pub use types::{AudioFrame, ListenerEvent, Utterance};
pub use vad_station::ClassifierStation;
