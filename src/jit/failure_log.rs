//! A bounded history of translation failures (§4.5.3), sized by
//! `CoreConfig::failure_history_capacity` (`ORUS_JIT_TRANSLATION_FAILURE_HISTORY`).

use crate::jit::value_kind::JitValueKind;
use std::collections::VecDeque;

/// Why a translation attempt failed (§4.5.1, §4.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A chunk byte sequence the translator does not recognize as any
    /// supported category.
    UnsupportedOpcode,
    /// A `LOOP_SHORT` back-edge whose target does not land on the loop
    /// header the translation started from.
    UnsupportedLoopShape,
    /// An operand's value kind is outside the active rollout stage's mask.
    RolloutDisabled,
    /// A moved register's tracked kind does not match what the destination
    /// expects.
    KindMismatch,
}

/// One recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub function_index: u32,
    pub loop_index: u32,
    pub reason: FailureReason,
    pub kind: Option<JitValueKind>,
    pub bytecode_offset: usize,
}

/// A fixed-capacity ring buffer of the most recent translation failures,
/// plus per-kind counters for the debug-build high-watermark assertion
/// (§4.5.3): if `rollout_disabled` failures for a kind already permitted by
/// the active stage keep climbing, that signals a translator bug rather
/// than an expected staged rejection.
#[derive(Debug)]
pub struct FailureLog {
    capacity: usize,
    records: VecDeque<FailureRecord>,
    rollout_disabled_counts: rustc_hash::FxHashMap<JitValueKind, u32>,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        FailureLog {
            capacity: capacity.max(1),
            records: VecDeque::new(),
            rollout_disabled_counts: rustc_hash::FxHashMap::default(),
        }
    }

    pub fn record(&mut self, function_index: u32, loop_index: u32, reason: FailureReason) {
        self.record_with_detail(function_index, loop_index, reason, None, 0);
    }

    pub fn record_with_detail(
        &mut self,
        function_index: u32,
        loop_index: u32,
        reason: FailureReason,
        kind: Option<JitValueKind>,
        bytecode_offset: usize,
    ) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(FailureRecord { function_index, loop_index, reason, kind, bytecode_offset });
        if reason == FailureReason::RolloutDisabled {
            if let Some(kind) = kind {
                *self.rollout_disabled_counts.entry(kind).or_insert(0) += 1;
            }
        }
    }

    pub fn recent(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Debug-build escalation: a `rollout_disabled` rejection for a kind
    /// the active stage already permits should never happen, and is a
    /// translator bug rather than an expected staged rejection. Returns
    /// `true` (and is only meant to be consulted behind `debug_assert!`)
    /// when `kind`'s count has crossed `watermark`.
    pub fn rollout_disabled_count_exceeds(&self, kind: JitValueKind, watermark: u32) -> bool {
        self.rollout_disabled_counts.get(&kind).copied().unwrap_or(0) > watermark
    }
}
