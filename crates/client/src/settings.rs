use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client behavior knobs. Everything has a sensible default; construct with
/// struct-update syntax for overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Decode object updates even when nothing subscribes to them.
    pub always_decode_objects: bool,
    /// Retain primitives in the per-simulator world store.
    pub object_tracking: bool,
    /// Retain avatars in the per-simulator world store.
    pub avatar_tracking: bool,
    /// Run the dead-reckoning timer between server updates.
    pub use_interpolation_timer: bool,
    pub interpolation_interval_ms: u64,
    /// No traffic for this long marks a circuit as a disconnect candidate;
    /// a second quiet interval shuts it down.
    pub simulator_timeout_ms: u64,
    pub logout_timeout_ms: u64,
    pub login_timeout_ms: u64,
    /// Push the default throttle to every simulator that becomes current.
    pub send_agent_throttle: bool,
    /// Honor EnableSimulator messages by opening child circuits.
    pub multiple_sims: bool,
    pub map_request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            always_decode_objects: false,
            object_tracking: true,
            avatar_tracking: true,
            use_interpolation_timer: true,
            interpolation_interval_ms: 50,
            simulator_timeout_ms: 30_000,
            logout_timeout_ms: 5_000,
            login_timeout_ms: 60_000,
            send_agent_throttle: true,
            multiple_sims: true,
            map_request_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn interpolation_interval(&self) -> Duration {
        Duration::from_millis(self.interpolation_interval_ms)
    }

    pub fn simulator_timeout(&self) -> Duration {
        Duration::from_millis(self.simulator_timeout_ms)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
}
