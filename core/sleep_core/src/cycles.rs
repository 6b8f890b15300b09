//! Sleep-cycle calculator.
//!
//! Candidates are spaced by whole 90-minute cycles after a fixed 14-minute
//! fall-asleep latency. Going forward from a bedtime yields wake-up options;
//! going backward from a wake time yields bedtimes.

use serde::{Deserialize, Serialize};
use time::Time;

use crate::{
    entry::{round_to, CYCLE_MINUTES},
    error::ValidationError,
};

pub const FALL_ASLEEP_MINUTES: i64 = 14;
pub const MAX_CANDIDATE_CYCLES: u8 = 7;
const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Going to bed at the anchor; candidates are wake-up times.
    FromBedtime,
    /// Waking at the anchor; candidates are bedtimes.
    ToWaketime,
}

impl Direction {
    /// Accepts the query-string spellings used by clients.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_lowercase().as_str() {
            "bedtime" | "sleep" | "from_bedtime" => Ok(Direction::FromBedtime),
            "waketime" | "wake" | "to_waketime" => Ok(Direction::ToWaketime),
            _ => Err(ValidationError::InvalidMode),
        }
    }

    fn sign(self) -> i64 {
        match self {
            Direction::FromBedtime => 1,
            Direction::ToWaketime => -1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleCategory {
    Emergency,
    Recommended,
    Extended,
}

impl CycleCategory {
    pub fn for_cycles(cycles: u8) -> Self {
        match cycles {
            0..=3 => CycleCategory::Emergency,
            4..=6 => CycleCategory::Recommended,
            _ => CycleCategory::Extended,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CycleCategory::Emergency => "Not Recommended",
            CycleCategory::Recommended => "Recommended",
            CycleCategory::Extended => "Extended Sleep",
        }
    }

    pub fn description(self, direction: Direction) -> &'static str {
        match (self, direction) {
            (CycleCategory::Emergency, Direction::FromBedtime) => {
                "Less than 4.5 hours of sleep. Not recommended for regular use."
            }
            (CycleCategory::Emergency, Direction::ToWaketime) => {
                "These bedtimes will result in less than 4.5 hours of sleep. Not recommended."
            }
            (CycleCategory::Recommended, Direction::FromBedtime) => {
                "6-9 hours of sleep. Ideal duration for most adults."
            }
            (CycleCategory::Recommended, Direction::ToWaketime) => {
                "These bedtimes will give you 6-9 hours of sleep. Perfect for most adults."
            }
            (CycleCategory::Extended, Direction::FromBedtime) => {
                "More than 9 hours of sleep. May be beneficial for some individuals."
            }
            (CycleCategory::Extended, Direction::ToWaketime) => {
                "These bedtimes will give you more than 9 hours of sleep. Consider if you need extra rest."
            }
        }
    }
}

/// Label shown next to a candidate; also the key for `Quality::from_cycle_label`.
pub fn quality_label_for_cycles(cycles: u8) -> &'static str {
    if cycles <= 3 {
        "Minimal Sleep"
    } else if cycles <= 6 {
        "Optimal"
    } else {
        "Extended"
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CycleCandidate {
    /// 24h clock, HH:MM.
    pub time: String,
    /// 12h clock, e.g. "2:46 PM".
    pub display_time: String,
    /// Calendar day of the candidate relative to the anchor (-1, 0 or +1).
    pub day_offset: i64,
    pub cycles: u8,
    pub total_minutes: i64,
    pub total_hours: f64,
    pub quality: &'static str,
    pub category: CycleCategory,
    pub category_label: &'static str,
    pub description: &'static str,
}

/// Seven candidates, ascending by cycle count, for either direction.
pub fn compute_cycles(anchor: Time, direction: Direction) -> Vec<CycleCandidate> {
    let anchor_minutes = anchor.hour() as i64 * 60 + anchor.minute() as i64;

    (1..=MAX_CANDIDATE_CYCLES)
        .map(|n| {
            let offset = FALL_ASLEEP_MINUTES + CYCLE_MINUTES * n as i64;
            let total = anchor_minutes + direction.sign() * offset;
            let day_offset = total.div_euclid(MINUTES_PER_DAY);
            let minute_of_day = total.rem_euclid(MINUTES_PER_DAY);

            let total_minutes = CYCLE_MINUTES * n as i64;
            let category = CycleCategory::for_cycles(n);
            CycleCandidate {
                time: format_hhmm(minute_of_day),
                display_time: format_12h(minute_of_day),
                day_offset,
                cycles: n,
                total_minutes,
                total_hours: round_to(total_minutes as f64 / 60.0, 2),
                quality: quality_label_for_cycles(n),
                category,
                category_label: category.label(),
                description: category.description(direction),
            }
        })
        .collect()
}

/// Parses `HH:MM`, `HH:MM:SS` or `h:mm AM/PM`. Seconds are accepted but ignored by
/// the calculator.
pub fn parse_time_of_day(input: &str) -> Result<Time, ValidationError> {
    let s = input.trim();
    let upper = s.to_uppercase();
    let (clock, meridiem) = if let Some(rest) = upper.strip_suffix("AM") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = upper.strip_suffix("PM") {
        (rest.trim_end(), Some(true))
    } else {
        (upper.as_str(), None)
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    // Hour is 1-2 digits; minutes and seconds are exactly 2.
    if parts.len() < 2
        || parts.len() > 3
        || parts[0].is_empty()
        || parts[0].len() > 2
        || parts[1..].iter().any(|p| p.len() != 2)
        || !parts.iter().all(|p| digits(p))
    {
        return Err(ValidationError::InvalidTime);
    }
    let mut hour: u8 = parts[0].parse().map_err(|_| ValidationError::InvalidTime)?;
    let minute: u8 = parts[1].parse().map_err(|_| ValidationError::InvalidTime)?;
    let second: u8 = match parts.get(2) {
        Some(p) => p.parse().map_err(|_| ValidationError::InvalidTime)?,
        None => 0,
    };

    if let Some(pm) = meridiem {
        if !(1..=12).contains(&hour) {
            return Err(ValidationError::InvalidTime);
        }
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }

    Time::from_hms(hour, minute, second).map_err(|_| ValidationError::InvalidTime)
}

fn format_hhmm(minute_of_day: i64) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

fn format_12h(minute_of_day: i64) -> String {
    let h = minute_of_day / 60;
    let m = minute_of_day % 60;
    let suffix = if h < 12 { "AM" } else { "PM" };
    let h12 = match h % 12 {
        0 => 12,
        v => v,
    };
    format!("{h12}:{m:02} {suffix}")
}
