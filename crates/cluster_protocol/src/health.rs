//! Load classification reported by channel nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability and load class of a channel node.
///
/// The state is never stored on its own by the reporting node: it is derived
/// from the maintenance flag, the running flag and the user counts every
/// time a heartbeat is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Booting,
    Normal,
    Busy,
    Full,
    Bursting,
    Maintenance,
}

impl HealthState {
    /// Classifies a node from its current inputs.
    ///
    /// The stress percentage divides before it scales, so every load below
    /// full capacity truncates to zero and reports `Normal`. Dashboards and
    /// the login side have always been fed this value, and the behavior is
    /// kept as-is; see DESIGN.md before changing it.
    pub fn classify(maintenance: bool, running: bool, current_users: i32, max_users: i32) -> Self {
        if maintenance {
            return if running {
                HealthState::Maintenance
            } else {
                HealthState::Booting
            };
        }

        let stress = stress_percent(current_users, max_users);

        if stress > 95 {
            HealthState::Bursting
        } else if stress > 70 {
            HealthState::Full
        } else if stress > 40 {
            HealthState::Busy
        } else {
            HealthState::Normal
        }
    }
}

/// Truncating load percentage, `(current / max) * 100`.
///
/// A non-positive maximum reports no stress instead of faulting.
pub fn stress_percent(current_users: i32, max_users: i32) -> i32 {
    if max_users <= 0 {
        return 0;
    }
    (current_users / max_users).saturating_mul(100)
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Booting => "booting",
            HealthState::Normal => "normal",
            HealthState::Busy => "busy",
            HealthState::Full => "full",
            HealthState::Bursting => "bursting",
            HealthState::Maintenance => "maintenance",
        };
        f.write_str(name)
    }
}
