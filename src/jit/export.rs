//! Profiling data export (§6.4): a stable, documented-by-example JSON
//! snapshot of instruction counts, hot loops, and function hit counts,
//! serialized with `serde`/`serde_json`.

use crate::jit::profiler::{HotPathSample, ModuleProfile};
use serde::Serialize;

/// One exported function's call/loop statistics.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSnapshot {
    pub function_index: u32,
    pub call_count: u32,
    pub jit_available: bool,
}

/// The full exportable snapshot of a module's profiling state (§6.4). The
/// schema is considered stable: new fields may be added, existing fields
/// are not renamed or removed without a major version bump.
#[derive(Debug, Clone, Serialize)]
pub struct ProfilingSnapshot {
    pub functions: Vec<FunctionSnapshot>,
    pub hot_paths: Vec<HotPathSample>,
    /// Total number of times a compiled entry was entered, across every
    /// function and loop in the module.
    pub jit_invocation_count: u64,
    /// Number of loop hits served directly from an already-compiled entry.
    pub cache_hit_count: u64,
    /// Number of loop hits that found no compiled entry and fell through to
    /// the tier-up gate (whether or not that gate then queued a translation).
    pub cache_miss_count: u64,
}

impl ProfilingSnapshot {
    pub fn capture(profile: &ModuleProfile, function_count: usize, loop_threshold: u32) -> Self {
        Self::capture_with_jit_stats(profile, function_count, loop_threshold, 0, 0, 0)
    }

    pub fn capture_with_jit_stats(
        profile: &ModuleProfile,
        function_count: usize,
        loop_threshold: u32,
        jit_invocation_count: u64,
        cache_hit_count: u64,
        cache_miss_count: u64,
    ) -> Self {
        let functions = (0..function_count as u32)
            .filter_map(|index| {
                profile.function(index).map(|f| FunctionSnapshot {
                    function_index: index,
                    call_count: f.call_count(),
                    jit_available: f.is_jit_available(),
                })
            })
            .collect();
        ProfilingSnapshot {
            functions,
            hot_paths: profile.hot_path_samples(loop_threshold),
            jit_invocation_count,
            cache_hit_count,
            cache_miss_count,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_path(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        let json = self.to_json().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_empty_profile_exports_an_empty_snapshot() {
        let profile = ModuleProfile::new(0);
        let snapshot = ProfilingSnapshot::capture(&profile, 0, 10_000);
        assert!(snapshot.functions.is_empty());
        assert!(snapshot.hot_paths.is_empty());
    }

    #[test]
    fn a_called_function_appears_with_its_count() {
        let profile = ModuleProfile::new(1);
        profile.record_call(0);
        profile.record_call(0);
        let snapshot = ProfilingSnapshot::capture(&profile, 1, 10_000);
        assert_eq!(snapshot.functions[0].call_count, 2);
    }

    #[test]
    fn the_snapshot_serializes_to_json() {
        let profile = ModuleProfile::new(1);
        profile.record_call(0);
        let snapshot = ProfilingSnapshot::capture(&profile, 1, 10_000);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("call_count"));
    }
}
