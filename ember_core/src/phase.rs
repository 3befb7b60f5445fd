//! Fuzzer phase state machine, as visible to the input engine.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Initial pass over the static corpus.
    DryRun = 0,
    /// Steady-state fuzzing loop.
    DynamicMain = 1,
    /// Post-fuzz walk that replays every corpus entry once.
    Minimize = 2,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::DryRun,
            1 => Phase::DynamicMain,
            2 => Phase::Minimize,
            _ => unreachable!("invalid phase value {}", v),
        }
    }
}

/// Process-wide phase cell. The input engine only reads it; transitions are
/// owned by the worker loop.
#[derive(Debug)]
pub struct PhaseState(AtomicU8);

impl PhaseState {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::SeqCst)
    }

    /// Move `from` to `to`; returns false if another thread already moved on.
    pub fn transition(&self, from: Phase, to: Phase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transition() {
        let state = PhaseState::new(Phase::DryRun);
        assert_eq!(state.get(), Phase::DryRun);

        assert!(state.transition(Phase::DryRun, Phase::DynamicMain));
        assert_eq!(state.get(), Phase::DynamicMain);

        // Second transition from the stale phase must lose.
        assert!(!state.transition(Phase::DryRun, Phase::Minimize));
        assert_eq!(state.get(), Phase::DynamicMain);

        state.set(Phase::Minimize);
        assert_eq!(state.get(), Phase::Minimize);
    }
}
