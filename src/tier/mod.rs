//! Per-tier rate ramp.
//!
//! A tier is tested by ramping the request rate batch by batch until the
//! server pushes back, declares its limit, or the rate or time budget runs out.

mod state;
mod tester;
mod window;

pub use state::{
    advance, probes_per_batch, time_exhausted, BatchSummary, RampParams, RampState, TierPhase,
    Transition,
};
pub use tester::{ProbeContext, TierRun, TierTester};
