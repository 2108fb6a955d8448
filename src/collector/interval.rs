//! Statistics sampling interval and its reconciliation with the array.
//!
//! Before each run the array's configured sampling interval is compared with
//! the collector's cadence and rewritten only when they disagree. The check
//! and the write are not atomic: only one collector may own the setting of a
//! given array at a time, otherwise two collectors with different cadences
//! will keep overwriting each other.

use std::time::Duration;

use tracing::{debug, info};

use crate::collector::traits::{ManagementService, ServiceError};
use crate::util::{format_cim_interval, parse_cim_interval};

/// Smallest interval the array supports.
pub const MIN_SAMPLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default collector cadence.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Invalid sampling interval value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    /// Below [`MIN_SAMPLING_INTERVAL`].
    BelowFloor(Duration),
    /// Not whole seconds, or otherwise unparsable.
    Invalid(String),
}

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalError::BelowFloor(d) => write!(
                f,
                "sampling interval {}s is below the {} minute minimum",
                d.as_secs(),
                MIN_SAMPLING_INTERVAL.as_secs() / 60
            ),
            IntervalError::Invalid(msg) => write!(f, "invalid sampling interval: {}", msg),
        }
    }
}

impl std::error::Error for IntervalError {}

/// A sampling interval of at least five minutes, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SamplingInterval(Duration);

impl SamplingInterval {
    pub fn new(interval: Duration) -> Result<Self, IntervalError> {
        if interval.subsec_nanos() != 0 {
            return Err(IntervalError::Invalid(format!(
                "{:?} is not a whole number of seconds",
                interval
            )));
        }
        if interval < MIN_SAMPLING_INTERVAL {
            return Err(IntervalError::BelowFloor(interval));
        }
        Ok(Self(interval))
    }

    pub fn from_minutes(minutes: u64) -> Result<Self, IntervalError> {
        let secs = minutes
            .checked_mul(60)
            .ok_or_else(|| IntervalError::Invalid(format!("{} minutes overflows", minutes)))?;
        Self::new(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// CIM interval encoding, e.g. `00000000001000.000000:000`.
    pub fn to_cim(&self) -> String {
        format_cim_interval(self.0)
    }
}

impl Default for SamplingInterval {
    fn default() -> Self {
        Self(DEFAULT_SAMPLING_INTERVAL)
    }
}

impl std::fmt::Display for SamplingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0.as_secs();
        if secs % 60 == 0 {
            write!(f, "{} minutes", secs / 60)
        } else {
            write!(f, "{} seconds", secs)
        }
    }
}

impl std::str::FromStr for SamplingInterval {
    type Err = IntervalError;

    /// Accepts plain minutes (`10`), an explicit unit (`15m`, `1h`, `600s`),
    /// or a CIM interval string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            let d = parse_cim_interval(s).map_err(|e| IntervalError::Invalid(e.to_string()))?;
            return Self::new(d);
        }

        let (number, multiplier) = if let Some(n) = s.strip_suffix('h') {
            (n, 3600)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60)
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1)
        } else {
            (s, 60)
        };

        let value = number
            .trim()
            .parse::<u64>()
            .map_err(|e| IntervalError::Invalid(format!("'{}': {}", s, e)))?;
        let secs = value
            .checked_mul(multiplier)
            .ok_or_else(|| IntervalError::Invalid(format!("'{}' overflows", s)))?;
        Self::new(Duration::from_secs(secs))
    }
}

/// Which half of the check-then-set failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Read,
    Write,
}

/// The array's sampling interval could not be read or updated.
///
/// No statistics are collected in a run that fails here; the next scheduled
/// run retries.
#[derive(Debug)]
pub struct IntervalReconciliationError {
    pub array: String,
    pub step: ReconcileStep,
    pub source: ServiceError,
}

impl std::fmt::Display for IntervalReconciliationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self.step {
            ReconcileStep::Read => "read",
            ReconcileStep::Write => "update",
        };
        write!(
            f,
            "failed to {} sampling interval of {}: {}",
            action, self.array, self.source
        )
    }
}

impl std::error::Error for IntervalReconciliationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Makes sure `array` samples at `desired`.
///
/// Returns `true` if the remote setting had to be changed.
pub fn ensure_interval<M: ManagementService + ?Sized>(
    service: &mut M,
    array: &str,
    desired: SamplingInterval,
) -> Result<bool, IntervalReconciliationError> {
    let current = service
        .sampling_interval(array)
        .map_err(|source| IntervalReconciliationError {
            array: array.to_string(),
            step: ReconcileStep::Read,
            source,
        })?;

    if current == desired.as_duration() {
        debug!("Sampling interval of {} already {}", array, desired);
        return Ok(false);
    }

    info!(
        "Setting sampling interval of {} to {} (was {}s)",
        array,
        desired,
        current.as_secs()
    );
    service
        .set_sampling_interval(array, desired)
        .map_err(|source| IntervalReconciliationError {
            array: array.to_string(),
            step: ReconcileStep::Write,
            source,
        })?;

    Ok(true)
}
