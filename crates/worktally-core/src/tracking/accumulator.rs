//! Elapsed-time accumulator.
//!
//! Turns wall-clock time between two observations of a running record into
//! whole effort units, carrying the remainder forward like a coin jar: the
//! units handed out so far, times the threshold, plus the minutes still in the
//! jar always equal the running minutes observed, whatever the tick cadence.
//!
//! The accumulator is pure. It never touches the store or the remote; callers
//! pick [`Accumulation::committed`] after the units were applied remotely and
//! [`Accumulation::deferred`] when they were not, so a failed patch never eats
//! accounted time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{RecordPatch, TrackingRecord};

/// Default conversion threshold: one effort unit per hour of running time.
pub const DEFAULT_THRESHOLD_MINUTES: u32 = 60;

/// Converts accumulated minutes into effort units.
///
/// The same threshold is used for the integer division and the modulus, so
/// the carried remainder is always below one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulator {
    threshold_minutes: u32,
}

/// Outcome of observing one record at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulation {
    pub id: String,
    pub observed_at: DateTime<Utc>,
    /// Timestamp written back to the record. For a running record this is the
    /// previous timestamp plus `elapsed_minutes`, never past `observed_at`.
    pub anchor: DateTime<Utc>,
    /// Whole minutes added by this observation (0 when paused or skewed).
    pub elapsed_minutes: u32,
    /// Carried minutes plus elapsed minutes, before conversion.
    pub pending_minutes: u32,
    /// Whole effort units ready to be applied.
    pub units: u32,
    /// Minutes carried forward once `units` have been applied.
    pub remainder_minutes: u32,
    /// Observation time was earlier than the stored timestamp.
    pub clock_skew: bool,
}

impl Accumulator {
    /// A zero threshold is treated as one minute.
    pub fn new(threshold_minutes: u32) -> Self {
        Self {
            threshold_minutes: threshold_minutes.max(1),
        }
    }

    pub fn threshold_minutes(&self) -> u32 {
        self.threshold_minutes
    }

    /// Observe `record` at `now`.
    ///
    /// While running, the stored timestamp only advances by the whole minutes
    /// counted, so seconds short of a minute stay on the clock for the next
    /// observation. Units are computed from the carried minutes too, so a
    /// backlog left by a failed patch converts even when no new minute elapsed.
    pub fn accumulate(&self, record: &TrackingRecord, now: DateTime<Utc>) -> Accumulation {
        let delta = now.signed_duration_since(record.last_updated);
        let clock_skew = delta < chrono::Duration::zero();

        if !record.running || clock_skew {
            return Accumulation {
                id: record.id.clone(),
                observed_at: now,
                anchor: now,
                elapsed_minutes: 0,
                pending_minutes: record.accumulated_minutes,
                units: 0,
                remainder_minutes: record.accumulated_minutes,
                clock_skew,
            };
        }

        let elapsed_minutes = u32::try_from(delta.num_minutes()).unwrap_or(u32::MAX);
        let anchor = record.last_updated + chrono::Duration::minutes(i64::from(elapsed_minutes));
        let pending_minutes = record.accumulated_minutes.saturating_add(elapsed_minutes);
        Accumulation {
            id: record.id.clone(),
            observed_at: now,
            anchor,
            elapsed_minutes,
            pending_minutes,
            units: pending_minutes / self.threshold_minutes,
            remainder_minutes: pending_minutes % self.threshold_minutes,
            clock_skew,
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_MINUTES)
    }
}

impl Accumulation {
    pub fn has_units(&self) -> bool {
        self.units > 0
    }

    /// Store write once the units were applied remotely (or there were none).
    pub fn committed(&self) -> RecordPatch {
        RecordPatch::new(&self.id)
            .accumulated_minutes(self.remainder_minutes)
            .last_updated(self.anchor)
    }

    /// Store write when applying the units failed: the elapsed minutes are kept
    /// unconverted so the next tick retries them.
    pub fn deferred(&self) -> RecordPatch {
        RecordPatch::new(&self.id)
            .accumulated_minutes(self.pending_minutes)
            .last_updated(self.anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn running(minutes: u32) -> TrackingRecord {
        let mut record = TrackingRecord::new("101", true, t0());
        record.accumulated_minutes = minutes;
        record
    }

    #[test]
    fn sixty_five_minutes_yields_one_unit_and_five_left() {
        let acc = Accumulator::new(60).accumulate(&running(0), t0() + Duration::minutes(65));
        assert_eq!(acc.elapsed_minutes, 65);
        assert_eq!(acc.units, 1);
        assert_eq!(acc.remainder_minutes, 5);
        assert!(!acc.clock_skew);
    }

    #[test]
    fn carried_remainder_counts_toward_next_unit() {
        let acc = Accumulator::new(60).accumulate(&running(55), t0() + Duration::minutes(5));
        assert_eq!(acc.units, 1);
        assert_eq!(acc.remainder_minutes, 0);
    }

    #[test]
    fn paused_record_only_refreshes_timestamp() {
        let mut record = running(40);
        record.running = false;
        let now = t0() + Duration::hours(8);

        let acc = Accumulator::default().accumulate(&record, now);
        assert_eq!(acc.units, 0);
        assert_eq!(acc.elapsed_minutes, 0);
        assert_eq!(acc.remainder_minutes, 40);

        let patch = acc.committed();
        assert_eq!(patch.accumulated_minutes, Some(40));
        assert_eq!(patch.last_updated, Some(now));
    }

    #[test]
    fn clock_skew_counts_as_zero_elapsed() {
        let acc = Accumulator::default().accumulate(&running(12), t0() - Duration::minutes(3));
        assert!(acc.clock_skew);
        assert_eq!(acc.elapsed_minutes, 0);
        assert_eq!(acc.remainder_minutes, 12);
    }

    #[test]
    fn sub_minute_gap_adds_nothing() {
        let acc = Accumulator::default().accumulate(&running(3), t0() + Duration::seconds(59));
        assert_eq!(acc.elapsed_minutes, 0);
        assert_eq!(acc.pending_minutes, 3);
        assert_eq!(acc.committed().last_updated, Some(t0()));
    }

    #[test]
    fn leftover_seconds_carry_into_next_tick() {
        let acc = Accumulator::default().accumulate(&running(0), t0() + Duration::seconds(150));
        assert_eq!(acc.elapsed_minutes, 2);
        assert_eq!(acc.anchor, t0() + Duration::minutes(2));
        assert_eq!(acc.committed().last_updated, Some(t0() + Duration::minutes(2)));
        assert_eq!(acc.deferred().last_updated, Some(t0() + Duration::minutes(2)));
    }

    #[test]
    fn ticks_just_short_of_five_minutes_lose_nothing() {
        let accumulator = Accumulator::new(60);
        let step = Duration::milliseconds(299_999);
        let mut record = running(0);
        let mut now = t0();
        let mut units = 0;

        for _ in 0..24 {
            now += step;
            let acc = accumulator.accumulate(&record, now);
            units += acc.units;
            record.merge(&acc.committed());
        }

        let elapsed = (now - t0()).num_minutes();
        assert_eq!(elapsed, 119);
        assert_eq!(i64::from(units * 60 + record.accumulated_minutes), elapsed);
        assert_eq!(units, 1);
        assert_eq!(record.accumulated_minutes, 59);
    }

    #[test]
    fn deferred_backlog_converts_without_new_minutes() {
        let acc = Accumulator::new(60).accumulate(&running(125), t0() + Duration::seconds(20));
        assert_eq!(acc.elapsed_minutes, 0);
        assert_eq!(acc.units, 2);
        assert_eq!(acc.remainder_minutes, 5);
    }

    #[test]
    fn paused_backlog_is_left_alone() {
        let mut record = running(125);
        record.running = false;
        let acc = Accumulator::new(60).accumulate(&record, t0() + Duration::minutes(5));
        assert_eq!(acc.units, 0);
        assert_eq!(acc.remainder_minutes, 125);
    }

    #[test]
    fn deferred_keeps_unconverted_minutes() {
        let acc = Accumulator::new(60).accumulate(&running(30), t0() + Duration::minutes(95));
        assert_eq!(acc.units, 2);
        assert_eq!(acc.committed().accumulated_minutes, Some(5));
        assert_eq!(acc.deferred().accumulated_minutes, Some(125));
    }

    #[test]
    fn zero_threshold_is_clamped() {
        assert_eq!(Accumulator::new(0).threshold_minutes(), 1);
    }

    #[test]
    fn one_long_tick_matches_four_short_ones() {
        let accumulator = Accumulator::new(5);

        let single = accumulator.accumulate(&running(0), t0() + Duration::minutes(12));

        let mut record = running(0);
        let mut units = 0;
        for step in 1..=4 {
            let acc = accumulator.accumulate(&record, t0() + Duration::minutes(3 * step));
            units += acc.units;
            record.merge(&acc.committed());
        }

        assert_eq!(single.units, units);
        assert_eq!(single.remainder_minutes, record.accumulated_minutes);
    }

    proptest! {
        #[test]
        fn units_and_remainder_conserve_running_minutes(
            threshold in 1u32..120,
            gaps in proptest::collection::vec(0i64..18_000, 1..40),
        ) {
            let accumulator = Accumulator::new(threshold);
            let mut record = running(0);
            let mut now = t0();
            let mut units = 0u32;

            for gap in gaps {
                now += Duration::seconds(gap);
                let acc = accumulator.accumulate(&record, now);
                units += acc.units;
                record.merge(&acc.committed());
                prop_assert!(record.accumulated_minutes < threshold);
                prop_assert!(record.last_updated <= now);
                prop_assert!(now - record.last_updated < Duration::minutes(1));
            }

            prop_assert_eq!(
                i64::from(units) * i64::from(threshold) + i64::from(record.accumulated_minutes),
                (now - t0()).num_minutes()
            );
        }

        #[test]
        fn paused_records_never_accrue(
            start in 0u32..59,
            gaps in proptest::collection::vec(0i64..10_000, 1..20),
        ) {
            let accumulator = Accumulator::default();
            let mut record = running(start);
            record.running = false;
            let mut now = t0();

            for gap in gaps {
                now += Duration::minutes(gap);
                let acc = accumulator.accumulate(&record, now);
                prop_assert_eq!(acc.units, 0);
                record.merge(&acc.committed());
                prop_assert_eq!(record.accumulated_minutes, start);
            }
        }
    }
}
