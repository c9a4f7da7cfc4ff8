//! Tracer configuration and startup calibration.
//!
//! [`TracerConfig`] is the single knob surface an embedder builds once at
//! startup; everything downstream (registry, lanes, backpressure,
//! marking) is constructed from it rather than reaching for globals.
//! [`StartupCalibration`] layers environment overrides on top of
//! programmatic defaults, the way a long-running service tunes ring
//! sizing per deployment without a recompile.

use crate::backpressure::{BackpressureConfig, DropPolicy};
use crate::error::TracerError;
use std::env;

/// Registry wiring mode (§9 Open Question (a)): left uncalibrated by
/// default since the spec does not fix thresholds for switching modes
/// automatically. `GlobalOnly` is the only mode exercised end-to-end
/// today; `DualWrite`/`PerThreadOnly` are reserved for a future registry
/// topology and are accepted here so config parsing is forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    GlobalOnly,
    DualWrite,
    PerThreadOnly,
}

#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub index_ring_capacity: u32,
    pub detail_ring_capacity: u32,
    pub index_record_size: usize,
    pub max_detail_record_size: usize,
    pub backpressure: BackpressureConfig,
    pub registry_mode: RegistryMode,
    pub drain_ceiling_passes: u32,
    pub session_root: std::path::PathBuf,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            index_ring_capacity: 4096,
            detail_ring_capacity: 1024,
            index_record_size: crate::event::INDEX_EVENT_SIZE,
            max_detail_record_size: 512,
            backpressure: BackpressureConfig::default(),
            registry_mode: RegistryMode::GlobalOnly,
            drain_ceiling_passes: 64,
            session_root: std::path::PathBuf::from("ada_traces"),
        }
    }
}

impl TracerConfig {
    pub fn validate(&self) -> Result<(), TracerError> {
        if !self.index_ring_capacity.is_power_of_two() {
            return Err(TracerError::InvalidArgument(
                "index_ring_capacity must be a power of two".into(),
            ));
        }
        if !self.detail_ring_capacity.is_power_of_two() {
            return Err(TracerError::InvalidArgument(
                "detail_ring_capacity must be a power of two".into(),
            ));
        }
        if self.max_detail_record_size < crate::atf::HEADER_SIZE.min(24) {
            return Err(TracerError::InvalidArgument(
                "max_detail_record_size too small for a detail header".into(),
            ));
        }
        Ok(())
    }
}

/// Environment overrides read once at process startup, named after the
/// `ADA_STARTUP_*` prefix so they're greppable in deploy configs
/// alongside other ambient tuning.
#[derive(Debug, Clone, Default)]
pub struct StartupCalibration {
    pub index_ring_capacity: Option<u32>,
    pub detail_ring_capacity: Option<u32>,
    pub drop_policy: Option<DropPolicy>,
}

impl StartupCalibration {
    pub fn from_env() -> Self {
        Self {
            index_ring_capacity: read_env_u32("ADA_STARTUP_INDEX_RING_CAPACITY"),
            detail_ring_capacity: read_env_u32("ADA_STARTUP_DETAIL_RING_CAPACITY"),
            drop_policy: env::var("ADA_STARTUP_DROP_POLICY").ok().and_then(|v| match v.as_str() {
                "drop_oldest" => Some(DropPolicy::DropOldest),
                "drop_newest" => Some(DropPolicy::DropNewest),
                "drop_by_priority" => Some(DropPolicy::DropByPriority),
                _ => None,
            }),
        }
    }

    /// Applies any present overrides onto `base`, returning the merged
    /// config. Absent overrides leave `base`'s value untouched.
    pub fn apply(&self, mut base: TracerConfig) -> TracerConfig {
        if let Some(v) = self.index_ring_capacity {
            base.index_ring_capacity = v;
        }
        if let Some(v) = self.detail_ring_capacity {
            base.detail_ring_capacity = v;
        }
        if let Some(policy) = self.drop_policy {
            base.backpressure.policy = policy;
        }
        base
    }
}

fn read_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(TracerConfig::default().validate().is_ok());
    }

    #[test]
    fn non_power_of_two_capacity_is_rejected() {
        let mut config = TracerConfig::default();
        config.index_ring_capacity = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn calibration_with_no_overrides_is_identity() {
        let calibration = StartupCalibration::default();
        let base = TracerConfig::default();
        let capacity = base.index_ring_capacity;
        let merged = calibration.apply(base);
        assert_eq!(merged.index_ring_capacity, capacity);
    }

    #[test]
    fn calibration_overrides_ring_capacity() {
        let calibration = StartupCalibration {
            index_ring_capacity: Some(8192),
            detail_ring_capacity: None,
            drop_policy: None,
        };
        let merged = calibration.apply(TracerConfig::default());
        assert_eq!(merged.index_ring_capacity, 8192);
    }
}
