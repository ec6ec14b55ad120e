//! User-recordable step sequencer.
//!
//! The sequencer owns the recorded pattern, the record cursor and the
//! playback cursor. It does not schedule anything itself: the engine asks it
//! for the next slot to visit on every step timer.

use crate::audio_engine::constants::{
    STEP_TIME_MAX_MS, STEP_TIME_MIN_MS, VALID_SLOT_COUNTS, VELOCITY_MAX, VELOCITY_MIN,
};
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::voice_key::SequenceStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Idle,
    /// Writing at `cursor`; stops when the cursor comes back to `origin`.
    Recording { origin: usize, cursor: usize },
}

/// Result of writing one recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedStep {
    pub slot: usize,
    /// Slot the next value goes to, or `None` if recording just finished.
    pub next_slot: Option<usize>,
}

/// One slot reached by the playback cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotVisit {
    pub index: usize,
    pub step: Option<SequenceStep>,
    pub velocity: f32,
}

/// Recorded pattern plus record/playback cursors.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    slots: Vec<Option<SequenceStep>>,
    velocities: Vec<f32>,
    step_time_ms: u32,
    record: RecordState,
    playing: bool,
    play_index: usize,
    first_cycle_started: bool,
}

impl StepSequencer {
    /// Creates an empty pattern of `slots` slots.
    ///
    /// # Parameters
    ///
    /// - `slots`: Pattern length; must be one of the valid slot counts
    /// - `step_time_ms`: Time between visited slots
    pub fn new(slots: usize, step_time_ms: u32) -> Self {
        Self {
            slots: vec![None; slots],
            velocities: vec![VELOCITY_MAX; slots],
            step_time_ms,
            record: RecordState::Idle,
            playing: false,
            play_index: 0,
            first_cycle_started: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Option<SequenceStep>] {
        &self.slots
    }

    pub fn velocities(&self) -> &[f32] {
        &self.velocities
    }

    pub fn step_time_ms(&self) -> u32 {
        self.step_time_ms
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.record, RecordState::Recording { .. })
    }

    /// Slot the next recorded value goes to.
    pub fn record_slot(&self) -> Option<usize> {
        match self.record {
            RecordState::Recording { cursor, .. } => Some(cursor),
            RecordState::Idle => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play_index(&self) -> usize {
        self.play_index
    }

    fn check_slot(&self, slot: usize) -> Result<(), EngineError> {
        if slot < self.slots.len() {
            Ok(())
        } else {
            Err(EngineError::SlotOutOfRange {
                slot,
                len: self.slots.len(),
            })
        }
    }

    fn next(&self, slot: usize) -> usize {
        (slot + 1) % self.slots.len()
    }

    /// Arms recording at `slot`.
    pub fn start_recording(&mut self, slot: usize) -> Result<(), EngineError> {
        self.check_slot(slot)?;
        self.record = RecordState::Recording {
            origin: slot,
            cursor: slot,
        };
        log::debug!("Recording from slot {slot}");
        Ok(())
    }

    pub fn stop_recording(&mut self) {
        self.record = RecordState::Idle;
    }

    /// Writes `value` at the record cursor and advances it.
    ///
    /// Recording stops once the cursor would return to the slot it started
    /// from. Returns `None` when not recording.
    pub fn record_step(&mut self, value: usize) -> Option<RecordedStep> {
        let RecordState::Recording { origin, cursor } = self.record else {
            log::debug!("Ignoring recorded value {value}: not recording");
            return None;
        };

        self.slots[cursor] = Some(SequenceStep::from_value(value));
        Some(RecordedStep {
            slot: cursor,
            next_slot: self.advance_record_cursor(origin, cursor),
        })
    }

    fn advance_record_cursor(&mut self, origin: usize, cursor: usize) -> Option<usize> {
        let next = self.next(cursor);
        if next == origin {
            self.record = RecordState::Idle;
            log::debug!("Recording wrapped back to slot {origin}; stopped");
            None
        } else {
            self.record = RecordState::Recording {
                origin,
                cursor: next,
            };
            Some(next)
        }
    }

    /// Writes a slot directly, outside of recording.
    pub fn set_slot(&mut self, slot: usize, step: Option<SequenceStep>) -> Result<(), EngineError> {
        self.check_slot(slot)?;
        self.slots[slot] = step;
        Ok(())
    }

    /// Empties `slot`. Clearing the slot under the record cursor skips it.
    pub fn clear_slot(&mut self, slot: usize) -> Result<(), EngineError> {
        self.check_slot(slot)?;
        self.slots[slot] = None;
        if let RecordState::Recording { origin, cursor } = self.record {
            if cursor == slot {
                self.advance_record_cursor(origin, cursor);
            }
        }
        Ok(())
    }

    pub fn set_step_time(&mut self, ms: u32) -> Result<(), EngineError> {
        if !(STEP_TIME_MIN_MS..=STEP_TIME_MAX_MS).contains(&ms) {
            return Err(EngineError::InvalidStepTime(ms));
        }
        self.step_time_ms = ms;
        Ok(())
    }

    pub fn set_velocity(&mut self, slot: usize, velocity: f32) -> Result<(), EngineError> {
        self.check_slot(slot)?;
        if !velocity.is_finite() || !(VELOCITY_MIN..=VELOCITY_MAX).contains(&velocity) {
            return Err(EngineError::InvalidVelocity(velocity));
        }
        self.velocities[slot] = velocity;
        Ok(())
    }

    /// Resizes the pattern, keeping the overlapping prefix of slots and velocities.
    ///
    /// Recording stops. Refused while playing.
    pub fn set_step_count(&mut self, slots: usize) -> Result<(), EngineError> {
        if !VALID_SLOT_COUNTS.contains(&slots) {
            return Err(EngineError::InvalidStepCount(slots));
        }
        if self.playing {
            return Err(EngineError::ResizeWhilePlaying);
        }
        self.record = RecordState::Idle;
        self.slots.resize(slots, None);
        self.velocities.resize(slots, VELOCITY_MAX);
        if self.play_index >= slots {
            self.play_index = 0;
        }
        Ok(())
    }

    /// Resets the playback cursor to slot 0.
    pub fn begin_playback(&mut self) {
        self.playing = true;
        self.play_index = 0;
        self.first_cycle_started = false;
    }

    pub fn end_playback(&mut self) {
        self.playing = false;
        self.play_index = 0;
        self.first_cycle_started = false;
    }

    /// Returns the slot to play now and moves the cursor on.
    ///
    /// Reaching slot 0 for the second time ends playback unless `looping`;
    /// in that case `None` is returned and the caller stops.
    pub fn next_visit(&mut self, looping: bool) -> Option<SlotVisit> {
        if !self.playing || self.slots.is_empty() {
            return None;
        }

        let index = self.play_index;
        if index == 0 {
            if self.first_cycle_started {
                if !looping {
                    return None;
                }
            } else {
                self.first_cycle_started = true;
            }
        }

        self.play_index = self.next(index);
        Some(SlotVisit {
            index,
            step: self.slots[index],
            velocity: self.velocities[index],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_wraps_from_origin() {
        let mut seq = StepSequencer::new(8, 200);
        seq.start_recording(3).expect("slot in range");

        let mut written = Vec::new();
        for value in 1..=8 {
            assert!(seq.is_recording());
            let recorded = seq.record_step(value).expect("recording");
            written.push(recorded.slot);
        }

        assert_eq!(written, vec![3, 4, 5, 6, 7, 0, 1, 2]);
        assert!(!seq.is_recording());
        assert_eq!(seq.slots()[3], Some(SequenceStep::Shape(1)));
        assert_eq!(seq.slots()[2], Some(SequenceStep::Shape(8)));
        assert_eq!(seq.record_step(9), None);
    }

    #[test]
    fn test_last_recorded_step_reports_stop() {
        let mut seq = StepSequencer::new(8, 200);
        seq.start_recording(0).expect("slot in range");
        for value in 0..7 {
            assert!(seq.record_step(value).and_then(|r| r.next_slot).is_some());
        }
        let last = seq.record_step(0).expect("recording");
        assert_eq!(last, RecordedStep { slot: 7, next_slot: None });
        assert_eq!(seq.slots()[0], Some(SequenceStep::Hum));
    }

    #[test]
    fn test_clear_slot_under_cursor_skips_it() {
        let mut seq = StepSequencer::new(8, 200);
        seq.set_slot(5, Some(SequenceStep::Shape(2))).expect("slot in range");
        seq.start_recording(5).expect("slot in range");

        seq.clear_slot(5).expect("slot in range");

        assert_eq!(seq.slots()[5], None);
        assert_eq!(seq.record_slot(), Some(6));
        assert!(matches!(
            seq.clear_slot(8),
            Err(EngineError::SlotOutOfRange { slot: 8, len: 8 })
        ));
    }

    #[test]
    fn test_step_time_limits() {
        let mut seq = StepSequencer::new(8, 200);
        assert_eq!(seq.set_step_time(49), Err(EngineError::InvalidStepTime(49)));
        assert_eq!(seq.set_step_time(2001), Err(EngineError::InvalidStepTime(2001)));
        assert!(seq.set_step_time(50).is_ok());
        assert!(seq.set_step_time(2000).is_ok());
        assert_eq!(seq.step_time_ms(), 2000);
    }

    #[test]
    fn test_velocity_validation() {
        let mut seq = StepSequencer::new(8, 200);
        assert!(seq.set_velocity(1, 0.5).is_ok());
        assert!((seq.velocities()[1] - 0.5).abs() < f32::EPSILON);
        assert!((seq.velocities()[0] - 1.0).abs() < f32::EPSILON);
        assert!(matches!(seq.set_velocity(1, 1.5), Err(EngineError::InvalidVelocity(_))));
        assert!(matches!(seq.set_velocity(1, f32::NAN), Err(EngineError::InvalidVelocity(_))));
    }

    #[test]
    fn test_resize_keeps_prefix() {
        let mut seq = StepSequencer::new(8, 200);
        seq.set_slot(1, Some(SequenceStep::Hum)).expect("slot in range");
        seq.set_slot(7, Some(SequenceStep::Shape(3))).expect("slot in range");
        seq.set_velocity(7, 0.25).expect("valid velocity");
        seq.start_recording(2).expect("slot in range");

        seq.set_step_count(16).expect("valid size");
        assert_eq!(seq.len(), 16);
        assert_eq!(seq.slots()[7], Some(SequenceStep::Shape(3)));
        assert_eq!(seq.slots()[15], None);
        assert!((seq.velocities()[15] - 1.0).abs() < f32::EPSILON);
        assert!(!seq.is_recording());

        seq.set_step_count(8).expect("valid size");
        assert_eq!(seq.slots()[1], Some(SequenceStep::Hum));
        assert!((seq.velocities()[7] - 0.25).abs() < f32::EPSILON);

        assert_eq!(seq.set_step_count(12), Err(EngineError::InvalidStepCount(12)));
        seq.begin_playback();
        assert_eq!(seq.set_step_count(32), Err(EngineError::ResizeWhilePlaying));
    }

    #[test]
    fn test_playback_stops_on_second_pass_without_loop() {
        let mut seq = StepSequencer::new(8, 200);
        seq.begin_playback();

        let visited: Vec<usize> = std::iter::from_fn(|| seq.next_visit(false))
            .map(|v| v.index)
            .collect();

        assert_eq!(visited, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_playback_loops() {
        let mut seq = StepSequencer::new(8, 200);
        seq.begin_playback();

        let visited: Vec<usize> = (0..20).filter_map(|_| seq.next_visit(true)).map(|v| v.index).collect();

        assert_eq!(visited.len(), 20);
        assert_eq!(visited[8], 0);
        assert_eq!(visited[19], 3);
    }

    #[test]
    fn test_not_playing_yields_nothing() {
        let mut seq = StepSequencer::new(8, 200);
        assert_eq!(seq.next_visit(true), None);
    }
}
