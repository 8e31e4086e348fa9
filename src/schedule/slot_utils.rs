use std::collections::HashSet;

use chrono::{NaiveTime, TimeDelta};

/// Fixed length of one bookable slot.
pub const SLOT_MINUTES: i64 = 30;

/// Candidate slot start times for one center day.
///
/// Yields `opening, opening + step, ...` while the value is strictly before
/// `closing`. Never wraps past midnight; an empty window (`opening >= closing`)
/// yields nothing. Cloning restarts from the current position.
#[derive(Debug, Clone)]
pub struct DaySlots {
    next: Option<NaiveTime>,
    closing: NaiveTime,
    step: TimeDelta,
}

impl DaySlots {
    pub fn new(opening: NaiveTime, closing: NaiveTime, step: TimeDelta) -> Self {
        let next = (opening < closing && step > TimeDelta::zero()).then_some(opening);
        Self {
            next,
            closing,
            step,
        }
    }
}

impl Iterator for DaySlots {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        let current = self.next.take()?;
        let (following, wrapped_secs) = current.overflowing_add_signed(self.step);
        if wrapped_secs == 0 && following < self.closing {
            self.next = Some(following);
        }
        Some(current)
    }
}

/// Slot start times for a center open between `opening` and `closing`.
pub fn generate_slots(opening: NaiveTime, closing: NaiveTime) -> DaySlots {
    DaySlots::new(opening, closing, TimeDelta::minutes(SLOT_MINUTES))
}

/// Drops every slot whose start time is already booked, keeping order.
/// Matching is by exact time of day.
pub fn available_slots<I>(slots: I, booked: &HashSet<NaiveTime>) -> Vec<NaiveTime>
where
    I: IntoIterator<Item = NaiveTime>,
{
    slots
        .into_iter()
        .filter(|slot| !booked.contains(slot))
        .collect()
}

/// Formats a slot as `HH:MM`.
pub fn slot_label(slot: NaiveTime) -> String {
    slot.format("%H:%M").to_string()
}
