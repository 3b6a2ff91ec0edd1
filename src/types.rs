//! Core value types shared across the Nodeflow engine.
//!
//! This module defines the small vocabulary the rest of the crate speaks:
//! execution and node lifecycle states, token accounting, and the
//! fixed-point [`Cost`] type used everywhere money is summed.
//!
//! # Examples
//!
//! ```rust
//! use nodeflow::types::{Cost, ExecutionStatus, TokenUsage};
//!
//! let mut total = Cost::ZERO;
//! total += Cost::from_f64(0.001_25);
//! total += Cost::from_micros(750);
//! assert_eq!(total.to_string(), "0.002000");
//!
//! let usage = TokenUsage::new(120, 40);
//! assert_eq!(usage.total, 160);
//!
//! assert!(!ExecutionStatus::Running.is_terminal());
//! assert!(ExecutionStatus::Cancelled.is_terminal());
//! ```

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle state of a whole execution.
///
/// Legal transitions: `Pending → Running → (Completed | Failed | Cancelled)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Returns `true` once the execution can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a single node within an execution.
///
/// Legal transitions: `Pending → Ready → Running → (Completed | Failed |
/// Cancelled | Skipped)`, plus `Pending → Skipped` when an ancestor failed
/// or the node is unreachable from the entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeStatus {
    /// Returns `true` once the node can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Monetary cost in fixed-point with six fractional digits.
///
/// Provider prices are quoted in fractions of a cent, so costs are summed
/// as integer micro-units rather than floats; accumulation over thousands
/// of node runs stays exact. The JSON representation is a plain number
/// (e.g. `0.002`), which is what transports and dashboards expect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(i64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    /// Micro-units per whole unit (six fractional digits).
    const SCALE: i64 = 1_000_000;

    #[must_use]
    pub fn from_micros(micros: i64) -> Self {
        Cost(micros)
    }

    /// Convert from a float amount, rounding to the nearest micro-unit.
    #[must_use]
    pub fn from_f64(amount: f64) -> Self {
        Cost((amount * Self::SCALE as f64).round() as i64)
    }

    #[must_use]
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::ZERO, Add::add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:06}",
            abs / Self::SCALE as u64,
            abs % Self::SCALE as u64
        )
    }
}

impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Cost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = f64::deserialize(deserializer)?;
        Ok(Cost::from_f64(amount))
    }
}

/// Prompt/completion token counts reported by a node run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt: self.prompt.saturating_add(rhs.prompt),
            completion: self.completion.saturating_add(rhs.completion),
            total: self.total.saturating_add(rhs.total),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}
