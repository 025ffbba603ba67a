use serde::{Deserialize, Serialize};

/// Day-of-week using the source's convention: 0=Sunday..6=Saturday. Any
/// implementation using a different convention must document the fact
/// rather than silently reinterpreting the numbers — this type is the
/// single place that conversion happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Weekday {
    Sunday = 0,
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

impl Weekday {
    pub fn from_index(n: i64) -> Option<Self> {
        Some(match n {
            0 => Weekday::Sunday,
            1 => Weekday::Monday,
            2 => Weekday::Tuesday,
            3 => Weekday::Wednesday,
            4 => Weekday::Thursday,
            5 => Weekday::Friday,
            6 => Weekday::Saturday,
            _ => return None,
        })
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Sunday => chrono::Weekday::Sun,
            Weekday::Monday => chrono::Weekday::Mon,
            Weekday::Tuesday => chrono::Weekday::Tue,
            Weekday::Wednesday => chrono::Weekday::Wed,
            Weekday::Thursday => chrono::Weekday::Thu,
            Weekday::Friday => chrono::Weekday::Fri,
            Weekday::Saturday => chrono::Weekday::Sat,
        }
    }
}

/// A project's `schedule` JSON column, deserialized into a structured model
/// instead of a raw cron expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    IntervalMinutes { interval: u32 },
    IntervalHours { interval: u32 },
    Daily { time: String },
    Weekly { time: String, days: Vec<i64> },
    Monthly { time: String, dates: Vec<u32> },
}

impl Schedule {
    /// Parse `"HH:MM"` into (hour, minute); returns `None` on malformed input
    /// rather than panicking — an invalid schedule is a programmer error that
    /// should surface at project-load time, not crash the scheduler loop.
    pub fn parse_time(time: &str) -> Option<(u32, u32)> {
        let (h, m) = time.split_once(':')?;
        let h: u32 = h.trim().parse().ok()?;
        let m: u32 = m.trim().parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some((h, m))
    }

    pub fn weekdays(&self) -> Vec<Weekday> {
        match self {
            Schedule::Weekly { days, .. } => {
                days.iter().filter_map(|d| Weekday::from_index(*d)).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_time() {
        assert_eq!(Schedule::parse_time("09:05"), Some((9, 5)));
    }

    #[test]
    fn rejects_malformed_time() {
        assert_eq!(Schedule::parse_time("9am"), None);
        assert_eq!(Schedule::parse_time("25:00"), None);
        assert_eq!(Schedule::parse_time("10:60"), None);
    }

    #[test]
    fn weekday_convention_is_zero_indexed_sunday() {
        assert_eq!(Weekday::from_index(0), Some(Weekday::Sunday));
        assert_eq!(Weekday::from_index(6), Some(Weekday::Saturday));
        assert_eq!(Weekday::from_index(7), None);
    }
}
