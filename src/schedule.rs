//! Candidate start times for one employee, one service duration, one date.
//!
//! All arithmetic is in minutes since midnight; `HH:MM` strings only exist
//! at the storage boundary.

/// Candidate slots snap to this grid, anchored at the first grid point at or
/// after the working-window start.
pub const SLOT_GRID_MINUTES: u32 = 10;

/// Same-day slots must leave the client at least this long to arrive.
pub const ARRIVAL_BUFFER_MINUTES: u32 = 30;

/// Parse a time string in "HH:MM" format into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Result<u32, String> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid time format '{value}', expected HH:MM"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid hour in '{value}'"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid minute in '{value}'"))?;
    if hour >= 24 || minute >= 60 {
        return Err(format!("Time '{value}' out of range"));
    }
    Ok(hour * 60 + minute)
}

pub fn format_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// A booked `[start, end)` interval, in minutes since midnight.
pub type BookedInterval = (u32, u32);

fn overlaps(start: u32, end: u32, other: &BookedInterval) -> bool {
    start < other.1 && other.0 < end
}

/// Ordered valid start times for a service of `duration_minutes` within the
/// working window `[window_start, window_end)`, skipping `booked` intervals.
///
/// `cutoff_minutes` is `Some` when the date is today; slots starting before
/// it are excluded. Client-facing listings pass now + the arrival buffer,
/// the queue engine passes bare now since the notification window already
/// paces its offers. An empty result means the day is fully booked, not an
/// error.
pub fn available_starts(
    window_start: u32,
    window_end: u32,
    duration_minutes: u32,
    booked: &[BookedInterval],
    cutoff_minutes: Option<u32>,
) -> Vec<u32> {
    if duration_minutes == 0 || window_end <= window_start {
        return Vec::new();
    }

    let first = window_start.div_ceil(SLOT_GRID_MINUTES) * SLOT_GRID_MINUTES;
    let mut starts = Vec::new();
    let mut t = first;
    while t + duration_minutes <= window_end {
        let end = t + duration_minutes;
        let too_soon = cutoff_minutes.is_some_and(|c| t < c);
        if !too_soon && !booked.iter().any(|b| overlaps(t, end, b)) {
            starts.push(t);
        }
        t += SLOT_GRID_MINUTES;
    }
    starts
}
