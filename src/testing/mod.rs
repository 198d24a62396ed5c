//! Test harness: canned kernel programs and an event-recording plugin.
//!
//! The [`programs`] module builds small, known-good kernel modules (a
//! copy kernel, an atomic counter, a barrier exchange, …) used by the
//! integration suites and the demo binary. [`EventRecorder`] captures the
//! full plugin event stream so tests can assert on both memory contents
//! and the observable event order.

pub mod programs;
pub mod recorder;

pub use recorder::{Event, EventRecorder};
