//! Common type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable overriding the compute device (`cpu` or `gpu`).
pub const DEVICE_ENV: &str = "PALIGN_DEVICE";

/// Environment variable holding the process-local rank in distributed runs.
pub const LOCAL_RANK_ENV: &str = "LOCAL_RANK";

/// Compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU computation.
    Cpu,
    /// GPU computation.
    Gpu,
}

impl Default for Device {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Gpu
        } else {
            Self::Cpu
        }
    }
}

impl std::str::FromStr for Device {
    type Err = crate::PAlignError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" | "metal" | "mps" => Ok(Self::Gpu),
            other => Err(crate::PAlignError::InvalidArgument(format!(
                "unknown device '{}'",
                other
            ))),
        }
    }
}

/// A device together with its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceLocation {
    /// Device kind.
    pub device: Device,
    /// Device index (the local rank in distributed runs).
    pub ordinal: usize,
}

impl DeviceLocation {
    /// The first CPU device.
    pub const fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            ordinal: 0,
        }
    }
}

impl Default for DeviceLocation {
    fn default() -> Self {
        Self {
            device: Device::default(),
            ordinal: 0,
        }
    }
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu => write!(f, "gpu:{}", self.ordinal),
        }
    }
}

/// Resolve the device batches should be placed on.
///
/// `PALIGN_DEVICE` overrides the platform default and `LOCAL_RANK` selects the
/// ordinal. Unparseable values fall back to the defaults with a warning.
pub fn current_device() -> DeviceLocation {
    resolve_device(
        std::env::var(DEVICE_ENV).ok().as_deref(),
        std::env::var(LOCAL_RANK_ENV).ok().as_deref(),
    )
}

fn resolve_device(device: Option<&str>, local_rank: Option<&str>) -> DeviceLocation {
    let device = match device.map(str::parse::<Device>) {
        Some(Ok(device)) => device,
        Some(Err(e)) => {
            tracing::warn!("Ignoring {}: {}", DEVICE_ENV, e);
            Device::default()
        }
        None => Device::default(),
    };

    let ordinal = match local_rank.map(|r| r.trim().parse::<usize>()) {
        Some(Ok(rank)) => rank,
        Some(Err(_)) => {
            tracing::warn!("Ignoring non-numeric {}", LOCAL_RANK_ENV);
            0
        }
        None => 0,
    };

    DeviceLocation { device, ordinal }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parse() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Gpu);
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn test_resolve_device_overrides() {
        let loc = resolve_device(Some("gpu"), Some("3"));
        assert_eq!(loc.device, Device::Gpu);
        assert_eq!(loc.ordinal, 3);
        assert_eq!(loc.to_string(), "gpu:3");
    }

    #[test]
    fn test_resolve_device_fallbacks() {
        let loc = resolve_device(Some("abacus"), Some("x"));
        assert_eq!(loc.device, Device::default());
        assert_eq!(loc.ordinal, 0);

        let loc = resolve_device(Some("cpu"), None);
        assert_eq!(loc, DeviceLocation::cpu());
        assert_eq!(loc.to_string(), "cpu");
    }
}
