//! # Desync Detection
//!
//! Compares the opaque state checksums every participant attached to its
//! record for the same tick.
//!
//! ## Flags
//!
//! - **State divergence**: a compared slot's checksum differs from the first
//!   compared slot's.
//! - **Replay divergence**: while playing back a turn file, the checksum the
//!   simulation computes now differs from the one stored when the file was
//!   recorded.
//!
//! The flags are independent and never fatal. The detector corrects nothing;
//! it only reports, and it reports every mismatch it sees.

use tracing::warn;

use crate::record::{ParticipantSlot, RecordSet, SlotMask};

/// Slots disagreeing with the reference slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateDivergence {
    /// First compared slot.
    pub reference: ParticipantSlot,
    /// Its checksum.
    pub reference_checksum: u32,
    /// Slots whose checksum differs from the reference.
    pub mismatched: SlotMask,
}

/// Live checksum disagreeing with the recorded one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayDivergence {
    /// Checksum stored in the turn file.
    pub stored: u32,
    /// Checksum the simulation computed during playback.
    pub live: u32,
}

/// Outcome of checking one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DesyncReport {
    /// Tick checked.
    pub tick: u32,
    /// Set when participants disagree.
    pub state: Option<StateDivergence>,
    /// Set when playback disagrees with the recording.
    pub replay: Option<ReplayDivergence>,
}

impl DesyncReport {
    /// Returns true when neither flag is raised.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.state.is_none() && self.replay.is_none()
    }

    /// Returns true when either flag is raised.
    #[must_use]
    pub const fn desync_detected(&self) -> bool {
        !self.is_clean()
    }
}

/// Running desync checks for one session.
#[derive(Debug, Default)]
pub struct DesyncDetector {
    ticks_checked: u64,
    state_divergences: u64,
    replay_divergences: u64,
    last_divergent_tick: Option<u32>,
    reports: Vec<DesyncReport>,
}

impl DesyncDetector {
    /// Creates a detector with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the checksums of the `compared` slots in `set`.
    pub fn check(&mut self, tick: u32, set: &RecordSet, compared: SlotMask) -> DesyncReport {
        let report = DesyncReport {
            tick,
            state: compare_slots(set, compared),
            replay: None,
        };
        self.record(report)
    }

    /// Checks a set read back from a turn file. `live_checksum` is what the
    /// simulation computed for this tick during playback; it is held against
    /// the reference slot's stored checksum.
    pub fn check_replayed(
        &mut self,
        tick: u32,
        stored: &RecordSet,
        compared: SlotMask,
        live_checksum: u32,
    ) -> DesyncReport {
        let replay = compared.first().and_then(|reference| {
            let stored = stored.get(reference).checksum;
            (stored != live_checksum).then_some(ReplayDivergence { stored, live: live_checksum })
        });
        let report = DesyncReport {
            tick,
            state: compare_slots(stored, compared),
            replay,
        };
        self.record(report)
    }

    fn record(&mut self, report: DesyncReport) -> DesyncReport {
        self.ticks_checked += 1;
        if let Some(state) = report.state {
            self.state_divergences += 1;
            warn!(
                "desync at tick {}: slots {:#06b} disagree with {} (checksum {:#010x})",
                report.tick,
                state.mismatched.bits(),
                state.reference,
                state.reference_checksum
            );
        }
        if let Some(replay) = report.replay {
            self.replay_divergences += 1;
            warn!(
                "replay diverged at tick {}: recorded {:#010x}, computed {:#010x}",
                report.tick, replay.stored, replay.live
            );
        }
        if report.desync_detected() {
            self.last_divergent_tick = Some(report.tick);
            self.reports.push(report);
        }
        report
    }

    /// Ticks checked so far.
    #[must_use]
    pub const fn ticks_checked(&self) -> u64 {
        self.ticks_checked
    }

    /// Ticks with a state divergence.
    #[must_use]
    pub const fn state_divergences(&self) -> u64 {
        self.state_divergences
    }

    /// Ticks with a replay divergence.
    #[must_use]
    pub const fn replay_divergences(&self) -> u64 {
        self.replay_divergences
    }

    /// Most recent tick with either flag raised.
    #[must_use]
    pub const fn last_divergent_tick(&self) -> Option<u32> {
        self.last_divergent_tick
    }

    /// Reports with a flag raised, oldest first.
    #[must_use]
    pub fn reports(&self) -> &[DesyncReport] {
        &self.reports
    }

    /// Drains the stored reports. Counters are kept.
    pub fn take_reports(&mut self) -> Vec<DesyncReport> {
        std::mem::take(&mut self.reports)
    }

    /// Clears counters and reports.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn compare_slots(set: &RecordSet, compared: SlotMask) -> Option<StateDivergence> {
    let reference = compared.first()?;
    let reference_checksum = set.get(reference).checksum;
    let mismatched = compared
        .iter()
        .filter(|slot| set.get(*slot).checksum != reference_checksum)
        .collect::<SlotMask>();
    (!mismatched.is_empty()).then_some(StateDivergence {
        reference,
        reference_checksum,
        mismatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, MAX_SLOTS};
    use proptest::prelude::*;

    fn set_with(checksums: &[u32]) -> RecordSet {
        let mut set = RecordSet::default();
        for (slot, checksum) in ParticipantSlot::all().zip(checksums) {
            set.set(slot, Record::noop(0, *checksum));
        }
        set.seal();
        set
    }

    fn all_slots() -> SlotMask {
        ParticipantSlot::all().collect()
    }

    #[test]
    fn test_agreement_is_clean() {
        let mut detector = DesyncDetector::new();
        let report = detector.check(3, &set_with(&[7, 7, 7, 7]), all_slots());
        assert!(report.is_clean());
        assert_eq!(detector.ticks_checked(), 1);
        assert!(detector.reports().is_empty());
    }

    #[test]
    fn test_mismatch_names_slot() {
        let mut detector = DesyncDetector::new();
        let report = detector.check(3, &set_with(&[7, 7, 8, 7]), all_slots());
        let state = report.state.unwrap();
        assert_eq!(state.reference, ParticipantSlot::HOST);
        assert_eq!(state.mismatched.bits(), 0b0100);
        assert_eq!(detector.state_divergences(), 1);
        assert_eq!(detector.last_divergent_tick(), Some(3));
    }

    #[test]
    fn test_uncompared_slots_ignored() {
        let mut detector = DesyncDetector::new();
        let compared = SlotMask::from_bits(0b0011);
        assert!(detector.check(0, &set_with(&[5, 5, 0, 99]), compared).is_clean());
        assert!(detector.check(1, &set_with(&[5, 5]), SlotMask::EMPTY).is_clean());
    }

    #[test]
    fn test_flags_are_independent() {
        let mut detector = DesyncDetector::new();
        let stored = set_with(&[11, 11]);
        let compared = SlotMask::from_bits(0b0011);

        let report = detector.check_replayed(0, &stored, compared, 12);
        assert!(report.state.is_none());
        assert_eq!(report.replay, Some(ReplayDivergence { stored: 11, live: 12 }));

        let report = detector.check_replayed(1, &set_with(&[11, 13]), compared, 11);
        assert!(report.state.is_some());
        assert!(report.replay.is_none());

        assert_eq!(detector.state_divergences(), 1);
        assert_eq!(detector.replay_divergences(), 1);
        assert_eq!(detector.take_reports().len(), 2);
        assert!(detector.reports().is_empty());
        assert_eq!(detector.ticks_checked(), 2);
    }

    proptest! {
        #[test]
        fn prop_identical_checksums_never_flag(checksum in any::<u32>(), bits in 0u8..16) {
            let set = set_with(&[checksum; MAX_SLOTS]);
            let mut detector = DesyncDetector::new();
            prop_assert!(detector.check(0, &set, SlotMask::from_bits(bits)).is_clean());
        }

        #[test]
        fn prop_single_difference_always_flags(
            checksum in any::<u32>(),
            delta in 1u32..,
            bits in 0u8..16,
            pick in 0usize..MAX_SLOTS,
        ) {
            let compared = SlotMask::from_bits(bits);
            prop_assume!(compared.count() >= 2);
            let odd = compared.iter().nth(pick % compared.count()).unwrap();

            let mut checksums = [checksum; MAX_SLOTS];
            checksums[odd.index()] = checksum.wrapping_add(delta);
            let mut detector = DesyncDetector::new();
            let report = detector.check(0, &set_with(&checksums), compared);
            prop_assert!(report.desync_detected());
            prop_assert_eq!(detector.state_divergences(), 1);
        }
    }
}
