//! Tunable thresholds and flags governing profiling and tier-up behavior.
//!
//! A small `Default`-derived policy struct, the way `CompilationPolicy`/
//! `JitConfig` are elsewhere in this codebase, rather than
//! environment-variable parsing, which belongs to a CLI layer outside this
//! core.

use crate::jit::value_kind::RolloutStage;

/// Session-wide configuration passed by reference to the profiler,
/// controller, and translator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Function-entry hit count that triggers tier-up consideration.
    pub call_threshold: u32,
    /// Loop back-edge hit count that triggers tier-up consideration.
    pub loop_threshold: u32,
    /// Insert an explicit `SAFEPOINT` IR op after this many consecutive
    /// non-terminal, non-safepoint instructions.
    pub safepoint_interval: u32,
    /// The currently active rollout stage gating which value kinds the
    /// translator is permitted to emit.
    pub rollout_stage: RolloutStage,
    /// Whether the JIT pipeline is enabled at all (step 1 of
    /// `queue_tier_up`).
    pub jit_enabled: bool,
    /// Functions whose bytecode region exceeds this many bytes are never
    /// considered for translation.
    pub max_function_size: usize,
    /// Capacity of the bounded translation-failure ring buffer
    /// (`ORUS_JIT_TRANSLATION_FAILURE_HISTORY`).
    pub failure_history_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            call_threshold: 1_000,
            loop_threshold: 10_000,
            safepoint_interval: 12,
            rollout_stage: RolloutStage::I32Only,
            jit_enabled: true,
            max_function_size: 4_096,
            failure_history_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.call_threshold, 1_000);
        assert_eq!(config.loop_threshold, 10_000);
        assert_eq!(config.safepoint_interval, 12);
        assert_eq!(config.rollout_stage, RolloutStage::I32Only);
        assert!(config.jit_enabled);
    }
}
