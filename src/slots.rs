//! Fixed daily period schedule and wall-clock resolution.
//!
//! Every civil computation happens in the configured fixed offset, never the
//! host time zone, so day and slot boundaries are identical everywhere the
//! daemon runs. Days of the week are numbered ISO style: 1 = Monday .. 7 = Sunday.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};

pub const SLOT_COUNT: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTime {
    pub number: u8,
    /// Minutes after local midnight.
    pub start: u32,
    pub end: u32,
}

const fn slot(number: u8, start: (u32, u32), end: (u32, u32)) -> SlotTime {
    SlotTime {
        number,
        start: start.0 * 60 + start.1,
        end: end.0 * 60 + end.1,
    }
}

pub const SCHEDULE: [SlotTime; SLOT_COUNT as usize] = [
    slot(1, (9, 0), (9, 50)),
    slot(2, (9, 50), (10, 40)),
    // recess
    slot(3, (10, 50), (11, 40)),
    slot(4, (11, 40), (12, 30)),
    slot(5, (12, 30), (13, 20)),
    slot(6, (13, 20), (14, 10)),
    slot(7, (14, 10), (15, 0)),
    // recess
    slot(8, (15, 10), (16, 0)),
    slot(9, (16, 0), (16, 50)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentSlot {
    pub slot_number: u8,
    pub day_of_week: u8,
}

impl SlotTime {
    fn bound(minutes: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
    }

    pub fn start_time(&self) -> NaiveTime {
        Self::bound(self.start)
    }

    pub fn end_time(&self) -> NaiveTime {
        Self::bound(self.end)
    }

    /// Inclusive at both ends; a shared boundary minute belongs to the earlier slot
    /// because resolution walks the schedule in order.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start_time() <= t && t <= self.end_time()
    }
}

pub fn is_valid_slot_number(n: i64) -> bool {
    n >= 1 && n <= SLOT_COUNT as i64
}

pub fn local_now(now: DateTime<Utc>, tz: &FixedOffset) -> DateTime<FixedOffset> {
    now.with_timezone(tz)
}

pub fn day_of_week(now: DateTime<Utc>, tz: &FixedOffset) -> u8 {
    local_now(now, tz).weekday().number_from_monday() as u8
}

pub fn attendance_date(now: DateTime<Utc>, tz: &FixedOffset) -> NaiveDate {
    local_now(now, tz).date_naive()
}

pub fn resolve_in(
    schedule: &[SlotTime],
    now: DateTime<Utc>,
    tz: &FixedOffset,
) -> Option<CurrentSlot> {
    let local = local_now(now, tz);
    let t = local.time();
    schedule.iter().find(|s| s.contains(t)).map(|s| CurrentSlot {
        slot_number: s.number,
        day_of_week: local.weekday().number_from_monday() as u8,
    })
}

pub fn resolve_current_slot(now: DateTime<Utc>, tz: &FixedOffset) -> Option<CurrentSlot> {
    resolve_in(&SCHEDULE, now, tz)
}

/// Startup check: numbered 1..=n in order, each range non-empty, no overlap
/// beyond a shared boundary minute, and everything inside one day.
pub fn validate_schedule(schedule: &[SlotTime]) -> anyhow::Result<()> {
    if schedule.is_empty() {
        anyhow::bail!("slot schedule is empty");
    }
    for (i, s) in schedule.iter().enumerate() {
        if s.number as usize != i + 1 {
            anyhow::bail!("slot at position {} is numbered {}", i + 1, s.number);
        }
        if s.start >= s.end {
            anyhow::bail!("slot {} starts at or after its end", s.number);
        }
        if s.end > 24 * 60 {
            anyhow::bail!("slot {} ends after midnight", s.number);
        }
        if let Some(prev) = i.checked_sub(1).map(|p| schedule[p]) {
            if s.start < prev.end {
                anyhow::bail!("slot {} overlaps slot {}", s.number, prev.number);
            }
        }
    }
    Ok(())
}

pub fn format_24h(t: NaiveTime) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}

/// `9:00 AM` style, no leading zero on the hour.
pub fn format_12h(t: NaiveTime) -> String {
    t.format("%-I:%M %p").to_string()
}
