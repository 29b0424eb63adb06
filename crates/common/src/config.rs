use serde::{Deserialize, Serialize};

use crate::error::{BasaltError, Result};

/// Engine-wide resource and partitioning configuration.
///
/// Read once at process start; the heap manager enforces the two ceilings
/// for the lifetime of the process, and the partitioner derives its slice
/// counts from the remaining knobs. The two `*_override` fields take
/// precedence over the computed defaults when set (typically from the
/// environment, see [`EngineConfig::from_env`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum committed (resident) bytes across all heaps.
    pub mem_ceiling_bytes: usize,
    /// Maximum reserved address-space bytes across all heaps.
    pub vm_ceiling_bytes: usize,
    /// Worker threads available to sliced execution.
    pub thread_count: usize,
    /// Smallest row count worth giving its own slice.
    pub min_partition_rows: u64,
    /// Upper clamp on the number of slices per program.
    pub max_slices: u64,
    /// Explicit slice count, overriding the cost formula entirely.
    pub pieces_override: Option<u64>,
    /// Explicit per-row byte estimate, overriding the oracle's.
    pub slice_row_bytes_override: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_ceiling_bytes: 512 * 1024 * 1024,
            vm_ceiling_bytes: 4 * 1024 * 1024 * 1024,
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            min_partition_rows: 100_000,
            max_slices: 64,
            pieces_override: None,
            slice_row_bytes_override: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus environment overrides.
    ///
    /// Recognized variables: `BASALT_MEM_CEILING`, `BASALT_VM_CEILING`,
    /// `BASALT_THREADS`, `BASALT_PIECES`, `BASALT_SLICE_BYTES`. Values are
    /// plain byte/count integers; anything unparseable is an
    /// [`BasaltError::InvalidConfig`] rather than a silent fallback.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = read_env("BASALT_MEM_CEILING")? {
            cfg.mem_ceiling_bytes = v as usize;
        }
        if let Some(v) = read_env("BASALT_VM_CEILING")? {
            cfg.vm_ceiling_bytes = v as usize;
        }
        if let Some(v) = read_env("BASALT_THREADS")? {
            if v == 0 {
                return Err(BasaltError::InvalidConfig(
                    "BASALT_THREADS must be >= 1".to_string(),
                ));
            }
            cfg.thread_count = v as usize;
        }
        if let Some(v) = read_env("BASALT_PIECES")? {
            cfg.pieces_override = Some(v);
        }
        if let Some(v) = read_env("BASALT_SLICE_BYTES")? {
            cfg.slice_row_bytes_override = Some(v);
        }
        Ok(cfg)
    }
}

fn read_env(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| BasaltError::InvalidConfig(format!("{name}={raw:?} is not an integer"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(BasaltError::InvalidConfig(format!(
            "{name} is not valid unicode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_overrides_are_unset() {
        let cfg = EngineConfig::default();
        assert!(cfg.pieces_override.is_none());
        assert!(cfg.slice_row_bytes_override.is_none());
        assert!(cfg.thread_count >= 1);
    }
}
