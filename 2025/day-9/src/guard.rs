use std::fs;

use crate::error::{Result, TheaterError};

const MIB: u64 = 1024 * 1024;

/// Available memory, in MiB, below which long scans give up.
pub const DEFAULT_FLOOR_MIB: u64 = 500;

/// Aborts a stage when available system memory drops under a floor.
///
/// On platforms without `/proc/meminfo` the probe reports nothing and the guard never trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryGuard {
    floor_mib: Option<u64>,
}

impl Default for MemoryGuard {
    fn default() -> Self {
        Self::with_floor_mib(DEFAULT_FLOOR_MIB)
    }
}

impl MemoryGuard {
    pub fn with_floor_mib(floor_mib: u64) -> Self {
        Self {
            floor_mib: Some(floor_mib),
        }
    }

    pub fn disabled() -> Self {
        Self { floor_mib: None }
    }

    pub fn check(&self) -> Result<()> {
        let Some(floor_mib) = self.floor_mib else {
            return Ok(());
        };
        match available_bytes() {
            Some(bytes) if bytes / MIB < floor_mib => Err(TheaterError::LowMemory {
                available_mib: bytes / MIB,
                floor_mib,
            }),
            _ => Ok(()),
        }
    }
}

/// Reads `MemAvailable` from the kernel, in bytes.
pub fn available_bytes() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?;
    let kib = line
        .trim_start_matches("MemAvailable:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_mem_available() {
        let meminfo = "MemTotal:       16318464 kB
MemFree:          523220 kB
MemAvailable:    8388608 kB
Buffers:          120000 kB";
        assert_eq!(Some(8 * 1024 * 1024 * 1024), parse_mem_available(meminfo));
        assert_eq!(None, parse_mem_available("MemTotal: 1 kB"));
    }

    #[test]
    fn disabled_guard_never_trips() {
        assert!(MemoryGuard::disabled().check().is_ok());
    }

    #[test]
    fn unreachable_floor_trips_when_probe_works() {
        let guard = MemoryGuard::with_floor_mib(u64::MAX);
        match available_bytes() {
            Some(_) => assert!(matches!(
                guard.check(),
                Err(TheaterError::LowMemory { .. })
            )),
            None => assert!(guard.check().is_ok()),
        }
    }
}
