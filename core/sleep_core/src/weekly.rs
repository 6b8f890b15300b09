//! Weekly statistics over a user's sleep entries.

use serde::Serialize;
use time::Date;

use crate::{
    entry::{format_date, serialize_date, Quality, SleepEntry},
    error::ValidationError,
};

pub const DAYS_PER_WEEK: usize = 7;
const BEST_DAY_MIN_HOURS: f64 = 7.0;
const BEST_DAY_MAX_HOURS: f64 = 9.0;

/// Where a day's hours sit relative to the user's goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalBand {
    BelowGoal,
    NearGoal,
    AboveGoal,
}

pub fn classify_hours(hours: f64, goal: f64) -> GoalBand {
    if hours < goal {
        GoalBand::BelowGoal
    } else if hours <= goal + 1.0 {
        GoalBand::NearGoal
    } else {
        GoalBand::AboveGoal
    }
}

/// Goal-independent rating of a night's length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoursRating {
    Insufficient,
    Adequate,
    Optimal,
    Extended,
}

pub fn rate_hours(hours: f64) -> HoursRating {
    if hours < 6.0 {
        HoursRating::Insufficient
    } else if hours < 7.0 {
        HoursRating::Adequate
    } else if hours <= 9.0 {
        HoursRating::Optimal
    } else {
        HoursRating::Extended
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WeekDay {
    pub index: usize,
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    pub day: &'static str,
    pub has_data: bool,
    pub hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band: Option<GoalBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<HoursRating>,
}

fn short_weekday(date: Date) -> &'static str {
    match date.weekday() {
        time::Weekday::Monday => "Mon",
        time::Weekday::Tuesday => "Tue",
        time::Weekday::Wednesday => "Wed",
        time::Weekday::Thursday => "Thu",
        time::Weekday::Friday => "Fri",
        time::Weekday::Saturday => "Sat",
        time::Weekday::Sunday => "Sun",
    }
}

/// The Sunday on or before `date`.
pub fn week_start_for(date: Date) -> Date {
    let back = date.weekday().number_days_from_sunday() as i64;
    date - time::Duration::days(back)
}

/// Last day of the week starting at `week_start`; fails past the calendar's end.
pub fn week_end_for(week_start: Date) -> Result<Date, ValidationError> {
    week_start
        .checked_add(time::Duration::days(DAYS_PER_WEEK as i64 - 1))
        .ok_or(ValidationError::InvalidDate)
}

/// Seven consecutive days from `week_start`, each bound to the entry stored for
/// exactly that date.
pub fn build_week(
    week_start: Date,
    entries: &[SleepEntry],
    goal: f64,
) -> Result<Vec<WeekDay>, ValidationError> {
    (0..DAYS_PER_WEEK)
        .map(|index| {
            let date = week_start
                .checked_add(time::Duration::days(index as i64))
                .ok_or(ValidationError::InvalidDate)?;
            Ok(match entries.iter().find(|e| e.date == date) {
                Some(e) => WeekDay {
                    index,
                    date,
                    day: short_weekday(date),
                    has_data: true,
                    hours: e.hours,
                    quality: Some(e.quality),
                    cycles: Some(e.cycles),
                    entry_id: Some(e.id),
                    band: Some(classify_hours(e.hours, goal)),
                    rating: Some(rate_hours(e.hours)),
                },
                None => WeekDay {
                    index,
                    date,
                    day: short_weekday(date),
                    has_data: false,
                    hours: 0.0,
                    quality: None,
                    cycles: None,
                    entry_id: None,
                    band: None,
                    rating: None,
                },
            })
        })
        .collect()
}

/// Among days with data inside 7–9 hours, the one closest to 8 hours; ties go to
/// the earliest date.
pub fn best_day(week: &[WeekDay]) -> Option<&WeekDay> {
    let midpoint = (BEST_DAY_MIN_HOURS + BEST_DAY_MAX_HOURS) / 2.0;
    week.iter()
        .filter(|d| d.has_data && (BEST_DAY_MIN_HOURS..=BEST_DAY_MAX_HOURS).contains(&d.hours))
        .min_by(|a, b| {
            let da = (a.hours - midpoint).abs();
            let db = (b.hours - midpoint).abs();
            da.total_cmp(&db).then(a.date.cmp(&b.date))
        })
}

pub fn average_hours(entries: &[SleepEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    entries.iter().map(|e| e.hours).sum::<f64>() / entries.len() as f64
}

/// Longest run of calendar-consecutive days with `hours >= goal`.
pub fn longest_streak(entries: &[SleepEntry], goal: f64) -> u32 {
    let mut sorted: Vec<&SleepEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.date);

    let mut best = 0u32;
    let mut current = 0u32;
    let mut prev_qualifying: Option<Date> = None;
    for e in sorted {
        if e.hours >= goal {
            current = match prev_qualifying.and_then(|p| p.next_day()) {
                Some(expected) if expected == e.date => current + 1,
                _ => 1,
            };
            prev_qualifying = Some(e.date);
            best = best.max(current);
        } else {
            current = 0;
            prev_qualifying = None;
        }
    }
    best
}

#[derive(Clone, Debug, Serialize)]
pub struct WeekSummary {
    pub week_start: String,
    pub week_end: String,
    pub goal_hours: f64,
    pub days: Vec<WeekDay>,
    pub best_day: Option<WeekDay>,
    pub days_logged: usize,
    /// Mean over the logged days of this week only.
    pub week_average_hours: f64,
    /// Mean over every entry the user has.
    pub average_hours: f64,
    pub longest_streak: u32,
}

pub fn summarize_week(
    week_start: Date,
    entries: &[SleepEntry],
    goal: f64,
) -> Result<WeekSummary, ValidationError> {
    let week_end = week_end_for(week_start)?;
    let days = build_week(week_start, entries, goal)?;
    let logged: Vec<&WeekDay> = days.iter().filter(|d| d.has_data).collect();
    let week_average_hours = if logged.is_empty() {
        0.0
    } else {
        logged.iter().map(|d| d.hours).sum::<f64>() / logged.len() as f64
    };

    Ok(WeekSummary {
        week_start: format_date(week_start),
        week_end: format_date(week_end),
        goal_hours: goal,
        best_day: best_day(&days).cloned(),
        days_logged: logged.len(),
        week_average_hours,
        average_hours: average_hours(entries),
        longest_streak: longest_streak(entries, goal),
        days,
    })
}
