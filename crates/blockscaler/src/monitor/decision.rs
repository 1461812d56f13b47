//! Growth policy of a single volume sample.

use crate::quantity::GI;

/// Capacity added by one resize.
pub const GROWTH_STEP: u64 = GI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrowthDecision {
    /// Enough free space, nothing to do.
    Sufficient,
    /// The claim already has the maximum capacity of its config.
    CeilingReached,
    /// The claim storage request should become `new_capacity` bytes.
    Grow { new_capacity: u64 },
}

impl GrowthDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sufficient => "sufficient",
            Self::CeilingReached => "ceiling_reached",
            Self::Grow { .. } => "grow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub threshold: f64,
    pub decision: GrowthDecision,
}

/// Decides whether a volume with `capacity` bytes and `available` free bytes
/// grows, given the trigger percentage and the maximum capacity.
pub fn evaluate(available: f64, capacity: u64, maximum: u64, trigger_percentage: u8) -> Evaluation {
    let capacity_f = capacity as f64;
    let threshold = capacity_f * f64::from(trigger_percentage) / 100.0;

    let decision = if available >= capacity_f - threshold {
        GrowthDecision::Sufficient
    } else if capacity >= maximum {
        GrowthDecision::CeilingReached
    } else {
        GrowthDecision::Grow {
            new_capacity: capacity.saturating_add(GROWTH_STEP).min(maximum),
        }
    };

    Evaluation {
        threshold,
        decision,
    }
}
