//! WAYPOST Tracker - Adaptive location sampling on the tracked client
//!
//! The [`SampleSource`] performs bounded single-shot reads; the
//! [`LocationSampler`] schedules them by visibility tier, samples
//! opportunistically on interaction and hands every sample to the history
//! store and the direct-then-enqueue writer. [`Tracker`] wires the whole
//! client side together from a [`WaypostConfig`](waypost_core::WaypostConfig).

pub mod sampler;
pub mod source;
pub mod tier;
pub mod tracker;

pub use sampler::{
    active_marker_key, LocationSampler, SamplerOptions, TickOutcome, ACTIVE_MARKER_PREFIX,
    ACTIVE_MARKER_VALUE, DEFAULT_OPPORTUNISTIC_PROBABILITY,
};
pub use source::SampleSource;
pub use tier::{SamplingTier, TierIntervals};
pub use tracker::Tracker;
