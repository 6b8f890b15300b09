use serde::{Deserialize, Serialize};
use time::Time;

use crate::{cycles::parse_time_of_day, error::ValidationError};

pub const DEFAULT_GOAL_HOURS: f64 = 8.0;
pub const DEFAULT_WAKE_TIME: &str = "07:00";
const GOAL_MIN_HOURS: f64 = 1.0;
const GOAL_MAX_HOURS: f64 = 12.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserSettings {
    pub sleep_goal_hours: f64,
    /// HH:MM
    pub default_wake_time: String,
}

impl UserSettings {
    pub fn with_goal(goal: f64) -> Self {
        UserSettings {
            sleep_goal_hours: goal,
            default_wake_time: DEFAULT_WAKE_TIME.to_string(),
        }
    }

    pub fn wake_time(&self) -> Result<Time, ValidationError> {
        parse_time_of_day(&self.default_wake_time)
    }

    /// Applies a partial update; nothing changes if any field is invalid.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<UserSettings, ValidationError> {
        let mut next = self.clone();
        if let Some(goal) = update.sleep_goal_hours {
            next.sleep_goal_hours = validate_goal(goal)?;
        }
        if let Some(wake) = update.default_wake_time.as_deref() {
            let t = parse_time_of_day(wake)?;
            next.default_wake_time = format!("{:02}:{:02}", t.hour(), t.minute());
        }
        Ok(next)
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        UserSettings::with_goal(DEFAULT_GOAL_HOURS)
    }
}

#[derive(Deserialize, Default)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub sleep_goal_hours: Option<f64>,
    #[serde(default)]
    pub default_wake_time: Option<String>,
}

pub fn validate_goal(goal: f64) -> Result<f64, ValidationError> {
    if !goal.is_finite() || !(GOAL_MIN_HOURS..=GOAL_MAX_HOURS).contains(&goal) {
        return Err(ValidationError::InvalidGoal);
    }
    Ok(goal)
}
