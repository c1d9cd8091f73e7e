//! Staged capital injection.
//!
//! Uninvested capital enters the market in stages depending on the shape of
//! the last two recorded notional prices `a`, `b` and the new one `c`:
//!
//! | shape                                   | stage  | fraction |
//! |-----------------------------------------|--------|----------|
//! | a ≥ b ≥ c, or peak with a ≥ c           | none   | 0        |
//! | trough, net non-increase (a ≥ c)        | First  | 0.20     |
//! | peak or trough, net non-decrease (a ≤ c)| Second | 0.25     |
//! | a ≤ b ≤ c                               | Third  | 1.00     |
//!
//! The shapes overlap only when two prices are equal. Rules are checked top
//! to bottom and the first match wins, so a flat or tied history injects
//! nothing rather than the full remainder.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionStage {
    First,
    Second,
    Third,
}

impl InjectionStage {
    /// Fraction of the remaining uninvested capital injected at this stage.
    pub fn fraction(self) -> f64 {
        match self {
            Self::First => 0.20,
            Self::Second => 0.25,
            Self::Third => 1.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Third => "third",
        }
    }
}

/// Stage implied by the price history and the new notional price alone.
pub fn injection_stage(history: &[f64], candidate: f64) -> Option<InjectionStage> {
    match history {
        [] => Some(InjectionStage::First),
        [a] => {
            if *a <= candidate {
                Some(InjectionStage::Second)
            } else {
                None
            }
        }
        [.., a, b] => classify(*a, *b, candidate),
    }
}

fn classify(a: f64, b: f64, c: f64) -> Option<InjectionStage> {
    if (a >= b && b >= c) || (a <= b && b >= c && a >= c) {
        None
    } else if a >= b && b <= c && a >= c {
        Some(InjectionStage::First)
    } else if (a <= b && b >= c && a <= c) || (a >= b && b <= c && a <= c) {
        Some(InjectionStage::Second)
    } else if a <= b && b <= c {
        Some(InjectionStage::Third)
    } else {
        None
    }
}

/// Full injection decision for a rebalance event.
///
/// Nothing is injected without uninvested capital. A fully liquidated
/// portfolio (`balance == 0`) always re-seeds with the first stage.
pub fn select_injection(
    history: &[f64],
    candidate: f64,
    balance: f64,
    investment: f64,
) -> Option<InjectionStage> {
    if investment <= 0.0 {
        return None;
    }
    if balance == 0.0 {
        return Some(InjectionStage::First);
    }
    injection_stage(history, candidate)
}
