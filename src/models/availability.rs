use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// One weekday's opening hours for a studio. `weekday` counts from Sunday = 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub weekday: u8,
    #[serde(with = "hhmm")]
    pub open_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub close_time: NaiveTime,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub windows: Vec<AvailabilityWindow>,
}

impl WeeklySchedule {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let schedule: WeeklySchedule = serde_json::from_str(s)?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = [false; 7];
        for window in &self.windows {
            let idx = usize::from(window.weekday);
            if idx > 6 {
                anyhow::bail!("invalid weekday: {}", window.weekday);
            }
            if seen[idx] {
                anyhow::bail!("duplicate window for {}", DAY_NAMES[idx]);
            }
            seen[idx] = true;
            if window.is_available && window.close_time <= window.open_time {
                anyhow::bail!(
                    "{}: close time {} must be after open time {}",
                    DAY_NAMES[idx],
                    window.close_time.format("%H:%M"),
                    window.open_time.format("%H:%M")
                );
            }
        }
        Ok(())
    }

    pub fn window_for(&self, weekday: u8) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.weekday == weekday)
    }

    /// Whether the local interval [start, end) sits inside a single day's [open, close).
    pub fn contains(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> bool {
        if start.date() != end.date() || end <= start {
            return false;
        }
        let weekday = start.weekday().num_days_from_sunday() as u8;
        match self.window_for(weekday) {
            Some(w) if w.is_available => w.open_time <= start.time() && end.time() <= w.close_time,
            _ => false,
        }
    }

    pub fn to_human_readable(&self) -> String {
        // Monday-first, as customers read a week.
        let mut open: Vec<&AvailabilityWindow> =
            self.windows.iter().filter(|w| w.is_available).collect();
        open.sort_by_key(|w| (w.weekday + 6) % 7);

        open.iter()
            .map(|w| {
                format!(
                    "{}: {}-{}",
                    DAY_NAMES[usize::from(w.weekday)],
                    w.open_time.format("%H:%M"),
                    w.close_time.format("%H:%M")
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub(crate) mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map_err(|_| format!("invalid time: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn monday_nine_to_ten_pm() -> WeeklySchedule {
        WeeklySchedule::from_json(
            r#"{"windows":[{"weekday":1,"open_time":"09:00","close_time":"22:00"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"windows":[{"weekday":1,"open_time":"09:00","close_time":"17:00"},{"weekday":2,"open_time":"09:00","close_time":"17:00","is_available":false}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert_eq!(schedule.windows.len(), 2);
        assert!(schedule.windows[0].is_available);
        assert!(!schedule.windows[1].is_available);
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(WeeklySchedule::from_json("not json").is_err());
    }

    #[test]
    fn test_parse_invalid_weekday() {
        let json = r#"{"windows":[{"weekday":7,"open_time":"09:00","close_time":"17:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"windows":[{"weekday":1,"open_time":"25:00","close_time":"17:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());
    }

    #[test]
    fn test_close_must_follow_open() {
        let json = r#"{"windows":[{"weekday":1,"open_time":"17:00","close_time":"09:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());

        // Closed days may carry any hours.
        let json = r#"{"windows":[{"weekday":1,"open_time":"00:00","close_time":"00:00","is_available":false}]}"#;
        assert!(WeeklySchedule::from_json(json).is_ok());
    }

    #[test]
    fn test_duplicate_weekday_rejected() {
        let json = r#"{"windows":[{"weekday":1,"open_time":"09:00","close_time":"12:00"},{"weekday":1,"open_time":"13:00","close_time":"17:00"}]}"#;
        assert!(WeeklySchedule::from_json(json).is_err());
    }

    #[test]
    fn test_contains_within_hours() {
        let schedule = monday_nine_to_ten_pm();
        // 2025-06-16 is a Monday
        assert!(schedule.contains(&dt("2025-06-16 09:00"), &dt("2025-06-16 10:00")));
        assert!(schedule.contains(&dt("2025-06-16 21:00"), &dt("2025-06-16 22:00")));
    }

    #[test]
    fn test_contains_outside_hours() {
        let schedule = monday_nine_to_ten_pm();
        assert!(!schedule.contains(&dt("2025-06-16 08:00"), &dt("2025-06-16 09:00")));
        assert!(!schedule.contains(&dt("2025-06-16 21:30"), &dt("2025-06-16 22:30")));
    }

    #[test]
    fn test_contains_wrong_day() {
        let schedule = monday_nine_to_ten_pm();
        // 2025-06-17 is a Tuesday
        assert!(!schedule.contains(&dt("2025-06-17 10:00"), &dt("2025-06-17 11:00")));
    }

    #[test]
    fn test_contains_rejects_day_crossing() {
        let schedule = WeeklySchedule::from_json(
            r#"{"windows":[{"weekday":1,"open_time":"00:00","close_time":"23:59"},{"weekday":2,"open_time":"00:00","close_time":"23:59"}]}"#,
        )
        .unwrap();
        assert!(!schedule.contains(&dt("2025-06-16 23:30"), &dt("2025-06-17 00:30")));
    }

    #[test]
    fn test_unavailable_day() {
        let schedule = WeeklySchedule::from_json(
            r#"{"windows":[{"weekday":1,"open_time":"09:00","close_time":"17:00","is_available":false}]}"#,
        )
        .unwrap();
        assert!(!schedule.contains(&dt("2025-06-16 10:00"), &dt("2025-06-16 11:00")));
    }

    #[test]
    fn test_to_human_readable() {
        let json = r#"{"windows":[{"weekday":0,"open_time":"10:00","close_time":"14:00"},{"weekday":5,"open_time":"10:00","close_time":"16:00"},{"weekday":1,"open_time":"09:00","close_time":"17:00"}]}"#;
        let schedule = WeeklySchedule::from_json(json).unwrap();
        assert_eq!(
            schedule.to_human_readable(),
            "Mon: 09:00-17:00, Fri: 10:00-16:00, Sun: 10:00-14:00"
        );
    }

    #[test]
    fn test_to_human_readable_empty() {
        assert_eq!(WeeklySchedule::default().to_human_readable(), "");
    }
}
