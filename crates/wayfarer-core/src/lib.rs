//! Shared primitives for the wayfarer agent orchestration core: id
//! generation, an injectable clock, and the canonical-JSON hashing used
//! for the workflow engine's plan fingerprints.

pub mod clock;
pub mod hash;
pub mod ids;
pub mod telemetry;

pub use clock::{Clock, FakeClock, SystemClock};
