//! Sleep entries as stored per user and day, plus the boundary parsing that
//! turns loosely typed client input into them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::error::ValidationError;

pub const MAX_HOURS: f64 = 24.0;
pub const MAX_CYCLES: u8 = 10;
pub const CYCLE_MINUTES: i64 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Light,
    Good,
    Optimal,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Light => "Light",
            Quality::Good => "Good",
            Quality::Optimal => "Optimal",
        }
    }

    /// Maps a cycle quality label onto the stored enum. Unknown labels become `Good`.
    pub fn from_cycle_label(label: &str) -> Quality {
        match label {
            "Minimal Sleep" => Quality::Light,
            "Optimal" => Quality::Good,
            "Extended" => Quality::Optimal,
            _ => Quality::Good,
        }
    }

    /// Default quality for manually logged hours.
    pub fn for_hours(hours: f64) -> Quality {
        if hours < 6.0 {
            Quality::Light
        } else if hours < 8.0 {
            Quality::Good
        } else {
            Quality::Optimal
        }
    }
}

impl FromStr for Quality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Light" => Ok(Quality::Light),
            "Good" => Ok(Quality::Good),
            "Optimal" => Ok(Quality::Optimal),
            _ => Err(ValidationError::InvalidQuality),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SleepEntry {
    pub id: i64,
    #[serde(serialize_with = "serialize_date")]
    pub date: Date,
    pub hours: f64,
    pub quality: Quality,
    pub cycles: u8,
    pub created_at: String,
    pub updated_at: String,
}

/// Validated payload for creating or replacing an entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntryInput {
    pub date: Date,
    pub hours: f64,
    pub quality: Quality,
    pub cycles: u8,
}

impl EntryInput {
    pub fn new(date: Date, hours: f64, quality: Quality, cycles: i64) -> Result<Self, ValidationError> {
        Ok(EntryInput {
            date,
            hours: validate_hours(hours)?,
            quality,
            cycles: validate_cycles(cycles)?,
        })
    }

    /// Parses `{date, hours, quality?, cycles?}`. Hours and cycles may arrive as
    /// numbers or numeric strings; a missing quality or cycle count is derived
    /// from the hours.
    pub fn from_json(v: &Value) -> Result<Self, ValidationError> {
        let present = |key: &str| v.get(key).filter(|f| !f.is_null());
        let (Some(date), Some(hours)) = (present("date"), present("hours")) else {
            return Err(ValidationError::MissingFields);
        };

        let date = date
            .as_str()
            .ok_or(ValidationError::InvalidDate)
            .and_then(parse_date)?;
        let hours = number_field(hours).ok_or(ValidationError::InvalidHours)?;
        let hours = validate_hours(hours)?;

        let cycles = match present("cycles") {
            Some(c) => {
                let c = number_field(c).ok_or(ValidationError::InvalidCycles)?;
                if c.fract() != 0.0 {
                    return Err(ValidationError::InvalidCycles);
                }
                c as i64
            }
            None => cycles_for_hours(hours) as i64,
        };
        let quality = match present("quality") {
            Some(q) => q.as_str().ok_or(ValidationError::InvalidQuality)?.parse()?,
            None => Quality::for_hours(hours),
        };

        EntryInput::new(date, hours, quality, cycles)
    }
}

fn number_field(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn validate_hours(hours: f64) -> Result<f64, ValidationError> {
    if !hours.is_finite() || !(0.0..=MAX_HOURS).contains(&hours) {
        return Err(ValidationError::InvalidHours);
    }
    Ok(hours)
}

pub fn validate_cycles(cycles: i64) -> Result<u8, ValidationError> {
    if !(0..=MAX_CYCLES as i64).contains(&cycles) {
        return Err(ValidationError::InvalidCycles);
    }
    Ok(cycles as u8)
}

/// Whole 90-minute cycles that fit in `hours`, capped at the stored maximum.
pub fn cycles_for_hours(hours: f64) -> u8 {
    let cycles = ((hours * 60.0) / CYCLE_MINUTES as f64).floor();
    cycles.clamp(0.0, MAX_CYCLES as f64) as u8
}

pub fn hours_for_cycles(cycles: u8) -> f64 {
    round_to(cycles as f64 * CYCLE_MINUTES as f64 / 60.0, 2)
}

pub fn round_to(v: f64, decimals: i32) -> f64 {
    let m = 10f64.powi(decimals);
    (v * m).round() / m
}

/// YYYY-MM-DD.
pub fn parse_date(s: &str) -> Result<Date, ValidationError> {
    let parts: Vec<&str> = s.trim().split('-').collect();
    let widths_ok = parts.len() == 3
        && parts[0].len() == 4
        && parts[1].len() == 2
        && parts[2].len() == 2;
    if !widths_ok || !parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) {
        return Err(ValidationError::InvalidDate);
    }
    let y: i32 = parts[0].parse().map_err(|_| ValidationError::InvalidDate)?;
    let m: u8 = parts[1].parse().map_err(|_| ValidationError::InvalidDate)?;
    let d: u8 = parts[2].parse().map_err(|_| ValidationError::InvalidDate)?;
    let month = time::Month::try_from(m).map_err(|_| ValidationError::InvalidDate)?;
    Date::from_calendar_date(y, month, d).map_err(|_| ValidationError::InvalidDate)
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn serialize_date<S: serde::Serializer>(date: &Date, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_date(*date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quality_parse_is_exact() {
        assert_eq!("Light".parse::<Quality>(), Ok(Quality::Light));
        assert_eq!(" Optimal ".parse::<Quality>(), Ok(Quality::Optimal));
        assert_eq!("good".parse::<Quality>(), Err(ValidationError::InvalidQuality));
        assert_eq!("".parse::<Quality>(), Err(ValidationError::InvalidQuality));
    }

    #[test]
    fn cycle_label_mapping_is_total() {
        assert_eq!(Quality::from_cycle_label("Minimal Sleep"), Quality::Light);
        assert_eq!(Quality::from_cycle_label("Optimal"), Quality::Good);
        assert_eq!(Quality::from_cycle_label("Extended"), Quality::Optimal);
        assert_eq!(Quality::from_cycle_label("whatever"), Quality::Good);
    }

    #[test]
    fn quality_for_hours_thresholds() {
        assert_eq!(Quality::for_hours(5.9), Quality::Light);
        assert_eq!(Quality::for_hours(6.0), Quality::Good);
        assert_eq!(Quality::for_hours(7.99), Quality::Good);
        assert_eq!(Quality::for_hours(8.0), Quality::Optimal);
    }

    #[test]
    fn cycles_and_hours_conversions() {
        assert_eq!(cycles_for_hours(7.5), 5);
        assert_eq!(cycles_for_hours(7.4), 4);
        assert_eq!(cycles_for_hours(24.0), 10);
        assert_eq!(hours_for_cycles(5), 7.5);
        assert_eq!(hours_for_cycles(1), 1.5);
    }

    #[test]
    fn parse_date_rejects_garbage() {
        let d = parse_date("2024-01-02").unwrap();
        assert_eq!(format_date(d), "2024-01-02");
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("24-01-02").is_err());
        assert!(parse_date("2024/01/02").is_err());
        assert!(parse_date("").is_err());
        assert!(parse_date("2024-+1-2").is_err());
        assert!(parse_date("2024-1-02").is_err());
        assert!(parse_date("2024-01-2").is_err());
        assert!(parse_date("+024-01-02").is_err());
        assert!(parse_date("2024-01--2").is_err());
    }

    #[test]
    fn entry_from_json_accepts_numeric_strings() {
        let input = EntryInput::from_json(&json!({
            "date": "2024-03-10",
            "hours": "7.25",
            "quality": "Good",
            "cycles": "4"
        }))
        .unwrap();
        assert_eq!(format_date(input.date), "2024-03-10");
        assert_eq!(input.hours, 7.25);
        assert_eq!(input.cycles, 4);
    }

    #[test]
    fn entry_from_json_validates_ranges() {
        let base = |hours: Value, cycles: Value, quality: &str| {
            EntryInput::from_json(&json!({
                "date": "2024-03-10",
                "hours": hours,
                "quality": quality,
                "cycles": cycles
            }))
        };
        assert_eq!(base(json!(25), json!(4), "Good"), Err(ValidationError::InvalidHours));
        assert_eq!(base(json!(-1), json!(4), "Good"), Err(ValidationError::InvalidHours));
        assert_eq!(base(json!(8), json!(11), "Good"), Err(ValidationError::InvalidCycles));
        assert_eq!(base(json!(8), json!(4.5), "Good"), Err(ValidationError::InvalidCycles));
        assert_eq!(base(json!(8), json!(4), "Great"), Err(ValidationError::InvalidQuality));
        assert!(base(json!(0), json!(0), "Light").is_ok());
    }

    #[test]
    fn entry_from_json_requires_date_and_hours() {
        let err = EntryInput::from_json(&json!({ "date": "2024-03-10", "quality": "Good" })).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields);
        let err = EntryInput::from_json(&json!({ "hours": 7, "date": null })).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields);
    }

    #[test]
    fn entry_from_json_derives_quality_and_cycles() {
        let input = EntryInput::from_json(&json!({ "date": "2024-03-10", "hours": 5.5 })).unwrap();
        assert_eq!(input.quality, Quality::Light);
        assert_eq!(input.cycles, 3);
    }
}
