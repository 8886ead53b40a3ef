//! Common types for the federation abstraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

const NANOS_PER_SEC: f64 = 1e9;

/// Simulation time with nanosecond resolution.
///
/// Stored as an integer so that instants computed as `k * step` compare
/// exactly. Serializes as floating-point seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct SimTime(i64);

impl SimTime {
    /// Time zero (start of execution).
    pub const ZERO: SimTime = SimTime(0);

    /// Smallest representable increment.
    pub const EPSILON: SimTime = SimTime(1);

    /// "Never" / end of time.
    pub const MAX: SimTime = SimTime(i64::MAX);

    /// Creates a time from whole nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Creates a time from seconds, rounding to the nearest nanosecond.
    ///
    /// Saturates at `MAX`; NaN maps to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() {
            return Self::ZERO;
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos >= i64::MAX as f64 {
            Self::MAX
        } else if nanos <= i64::MIN as f64 {
            Self(i64::MIN)
        } else {
            Self(nanos as i64)
        }
    }

    /// Returns the time in seconds.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    /// Returns the raw nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Returns true if this is the end-of-time sentinel.
    pub fn is_max(self) -> bool {
        self == Self::MAX
    }

    /// Rounds up to the next grid point `offset + k * period`.
    ///
    /// Returns `self` unchanged when `period` is zero or negative.
    pub fn snap_up(self, period: SimTime, offset: SimTime) -> SimTime {
        if period.0 <= 0 || self.is_max() {
            return self;
        }
        if self <= offset {
            return offset;
        }
        let since = (self.0 as i128) - (offset.0 as i128);
        let steps = (since + period.0 as i128 - 1) / period.0 as i128;
        let snapped = offset.0 as i128 + steps * period.0 as i128;
        if snapped >= i64::MAX as i128 {
            Self::MAX
        } else {
            Self(snapped as i64)
        }
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl From<f64> for SimTime {
    fn from(secs: f64) -> Self {
        SimTime::from_secs_f64(secs)
    }
}

impl From<SimTime> for f64 {
    fn from(time: SimTime) -> f64 {
        time.as_secs_f64()
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "max")
        } else {
            write!(f, "{}s", self.as_secs_f64())
        }
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the arena index behind this handle.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Identifies a participant within one federation.
    FederateId,
    "fed"
);
handle_type!(
    /// Handle to a registered publication (output coupling variable).
    PublicationId,
    "pub"
);
handle_type!(
    /// Handle to a registered subscription (input coupling variable).
    InputId,
    "input"
);
handle_type!(
    /// Handle to a registered message endpoint.
    EndpointId,
    "ept"
);
handle_type!(
    /// Handle to a registered message filter.
    FilterId,
    "filter"
);

/// Coarse participant lifecycle. Strictly linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Created,
    Initializing,
    Executing,
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "CREATED",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Executing => "EXECUTING",
            LifecycleState::Finalized => "FINALIZED",
        };
        f.write_str(name)
    }
}

/// Hint sent with an iterative time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationRequest {
    /// Move on; do not re-offer the current instant.
    NoIteration,
    /// Re-offer the current instant unconditionally.
    ForceIteration,
    /// Re-offer the current instant only if new data arrived at it.
    IterateIfNeeded,
}

impl fmt::Display for IterationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IterationRequest::NoIteration => "NO_ITERATION",
            IterationRequest::ForceIteration => "FORCE_ITERATION",
            IterationRequest::IterateIfNeeded => "ITERATE_IF_NEEDED",
        };
        f.write_str(name)
    }
}

/// The runtime's answer to an iterative time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// Granted a later instant.
    NextStep,
    /// Re-offered the same instant.
    Iterating,
    /// Past iteration for good: end of time or federation stop time.
    Halted,
    /// The federation failed while the request was pending.
    Error,
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IterationOutcome::NextStep => "NEXT_STEP",
            IterationOutcome::Iterating => "ITERATING",
            IterationOutcome::Halted => "HALTED",
            IterationOutcome::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Result of a time request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStep {
    /// Time the participant asked for.
    pub requested: SimTime,

    /// Authoritative instant the participant is now situated at.
    pub granted: SimTime,

    /// Iteration result accompanying the grant.
    pub outcome: IterationOutcome,
}

impl TimeStep {
    /// Returns true if the runtime re-offered the same instant.
    pub fn is_iteration(&self) -> bool {
        self.outcome == IterationOutcome::Iterating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_roundtrip_secs() {
        let t = SimTime::from_secs_f64(0.01);
        assert_eq!(t.as_nanos(), 10_000_000);
        assert_eq!(SimTime::from_secs_f64(0.02), t + t);
        assert!((t.as_secs_f64() - 0.01).abs() < 1e-15);
    }

    #[test]
    fn test_sim_time_saturates() {
        assert_eq!(SimTime::from_secs_f64(1e300), SimTime::MAX);
        assert_eq!(SimTime::MAX + SimTime::EPSILON, SimTime::MAX);
        assert_eq!(SimTime::from_secs_f64(f64::NAN), SimTime::ZERO);
    }

    #[test]
    fn test_snap_up() {
        let period = SimTime::from_secs_f64(0.01);

        assert_eq!(SimTime::EPSILON.snap_up(period, SimTime::ZERO), period);
        assert_eq!(period.snap_up(period, SimTime::ZERO), period);
        assert_eq!(
            SimTime::from_secs_f64(0.015).snap_up(period, SimTime::ZERO),
            SimTime::from_secs_f64(0.02)
        );

        // Zero period means no grid
        let t = SimTime::from_secs_f64(0.123);
        assert_eq!(t.snap_up(SimTime::ZERO, SimTime::ZERO), t);

        // Offset grid
        let offset = SimTime::from_secs_f64(0.5);
        assert_eq!(
            SimTime::from_secs_f64(0.7).snap_up(SimTime::from_secs_f64(1.0), offset),
            SimTime::from_secs_f64(1.5)
        );
    }

    #[test]
    fn test_sim_time_serde_as_seconds() {
        let t: SimTime = serde_json::from_str("1.5").unwrap();
        assert_eq!(t, SimTime::from_secs_f64(1.5));
        assert_eq!(serde_json::to_string(&t).unwrap(), "1.5");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(IterationRequest::ForceIteration.to_string(), "FORCE_ITERATION");
        assert_eq!(IterationOutcome::NextStep.to_string(), "NEXT_STEP");
        assert_eq!(LifecycleState::Finalized.to_string(), "FINALIZED");
        assert_eq!(FederateId(3).to_string(), "fed#3");
    }
}
