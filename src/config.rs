//! Runtime configuration for the scheduler and BVH builds.
//!
//! Defaults match the shipped kernels; `from_env` overlays `RTACCEL_*`
//! environment variables so tools can tune frames in flight and the
//! fence hang guard without recompiling.

use crate::error::{AccelError, AccelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Workgroup width every built-in kernel is compiled with.
pub const KERNEL_WORKGROUP_SIZE: u32 = 256;

/// Adapter power preference, mirrored so the config stays serde-friendly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    LowPower,
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Parameters for headless device creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
    pub label: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            label: "raytrace-accel-device".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    /// Number of command slots, i.e. the bound on frames in flight
    pub frames_in_flight: usize,
    /// Upper bound on a single fence wait; a hang guard, not a cancellation path
    pub fence_timeout_ms: u64,
    /// Must equal KERNEL_WORKGROUP_SIZE
    pub workgroup_size: u32,
    /// Budget checked before build buffers are allocated (0 disables)
    pub memory_budget_bytes: u64,
    /// Use the GPU pipeline when a device is available
    pub prefer_gpu: bool,
    pub device: DeviceConfig,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout_ms: u32::MAX as u64,
            workgroup_size: KERNEL_WORKGROUP_SIZE,
            memory_budget_bytes: 512 * 1024 * 1024,
            prefer_gpu: true,
            device: DeviceConfig::default(),
        }
    }
}

impl AccelConfig {
    /// Defaults overlaid with `RTACCEL_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("RTACCEL_FRAMES_IN_FLIGHT") {
            config.frames_in_flight = v;
        }
        if let Some(v) = env_parse::<u64>("RTACCEL_FENCE_TIMEOUT_MS") {
            config.fence_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("RTACCEL_MEMORY_BUDGET_MB") {
            config.memory_budget_bytes = v * 1024 * 1024;
        }
        if let Some(v) = env_parse::<bool>("RTACCEL_PREFER_GPU") {
            config.prefer_gpu = v;
        }
        config
    }

    pub fn validate(&self) -> AccelResult<()> {
        if self.frames_in_flight == 0 {
            return Err(AccelError::precondition(
                "frames_in_flight must be at least 1",
            ));
        }
        if self.workgroup_size != KERNEL_WORKGROUP_SIZE {
            return Err(AccelError::precondition(format!(
                "workgroup_size {} does not match the kernels ({})",
                self.workgroup_size, KERNEL_WORKGROUP_SIZE
            )));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = AccelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout(), Duration::from_millis(0xFFFF_FFFF));
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = AccelConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn foreign_workgroup_size_is_rejected() {
        let config = AccelConfig {
            workgroup_size: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
