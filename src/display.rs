use chrono::{NaiveDate, NaiveTime};

use crate::models::Center;
use crate::schedule::{generate_slots, slot_label};

/// Formats a center name with its city
pub fn format_center_name(center: &Center) -> String {
    match center.city.as_deref() {
        Some(city) if !city.is_empty() => format!("{} ({})", center.name, city),
        _ => center.name.clone(),
    }
}

/// Renders every slot of the day, marking the ones that are not open
pub fn format_day_slots(center: &Center, day: NaiveDate, open: &[NaiveTime]) -> String {
    let mut out = format!(
        "** {} on {} ({} - {}) **\n",
        format_center_name(center),
        day.format("%Y-%m-%d"),
        slot_label(center.opening_time),
        slot_label(center.closing_time),
    );

    for slot in generate_slots(center.opening_time, center.closing_time) {
        let marker = if open.contains(&slot) { "open" } else { "[unavailable]" };
        out.push_str(&format!("{} {}\n", slot_label(slot), marker));
    }
    out.push_str(&format!("{} open slot(s)\n", open.len()));
    out
}

pub fn print_day_slots(center: &Center, day: NaiveDate, open: &[NaiveTime]) {
    print!("{}", format_day_slots(center, day, open));
}
