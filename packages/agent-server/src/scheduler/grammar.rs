//! Schedule grammar (§4.2): `HH:MM-HH:MM@interval_minutes [day,day,...]`,
//! e.g. `02:00-06:00@120 mon,tue,wed,thu,fri` -- fire every two hours
//! inside the 02:00-06:00 window, weekdays only. An omitted day list means
//! every day; an omitted window means all day (`00:00-23:59`).
//!
//! ```text
//! schedule   := window "@" interval [ whitespace day_list ]
//! window     := time "-" time
//! time       := digit{2} ":" digit{2}
//! interval   := digit+
//! day_list   := day ("," day)*
//! day        := "mon" | "tue" | "wed" | "thu" | "fri" | "sat" | "sun"
//! ```

use agent_core::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    fn minutes_since_midnight(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

/// A parsed schedule specification.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub window_start: TimeOfDay,
    pub window_end: TimeOfDay,
    pub interval_minutes: u32,
    /// 0 = Monday .. 6 = Sunday, as `chrono`-style weekday numbering.
    pub days: [bool; 7],
}

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

impl Schedule {
    /// # Errors
    /// Returns `ConfigError::Parse` on any grammar violation.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let (window_and_interval, day_list) = match raw.split_once(char::is_whitespace) {
            Some((a, b)) => (a, Some(b.trim())),
            None => (raw, None),
        };
        let (window, interval_str) = window_and_interval.split_once('@').ok_or_else(|| bad(raw))?;
        let (start_str, end_str) = window.split_once('-').ok_or_else(|| bad(raw))?;
        let window_start = parse_time(start_str).ok_or_else(|| bad(raw))?;
        let window_end = parse_time(end_str).ok_or_else(|| bad(raw))?;
        let interval_minutes: u32 = interval_str.parse().map_err(|_| bad(raw))?;
        if interval_minutes == 0 {
            return Err(bad(raw));
        }

        let mut days = [true; 7];
        if let Some(list) = day_list.filter(|s| !s.is_empty()) {
            days = [false; 7];
            for token in list.split(',') {
                let idx = DAY_NAMES.iter().position(|d| *d == token.trim()).ok_or_else(|| bad(raw))?;
                days[idx] = true;
            }
        }

        Ok(Self { window_start, window_end, interval_minutes, days })
    }

    /// Whether `weekday` (0=Mon..6=Sun) and `minutes_since_midnight` fall
    /// inside this schedule's window and day set.
    #[must_use]
    pub fn in_window(&self, weekday: usize, minutes_since_midnight: u32) -> bool {
        weekday < 7
            && self.days[weekday]
            && minutes_since_midnight >= self.window_start.minutes_since_midnight()
            && minutes_since_midnight <= self.window_end.minutes_since_midnight()
    }
}

fn parse_time(s: &str) -> Option<TimeOfDay> {
    let (h, m) = s.split_once(':')?;
    let hour: u8 = h.parse().ok()?;
    let minute: u8 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(TimeOfDay { hour, minute })
}

fn bad(raw: &str) -> ConfigError {
    ConfigError::Parse(format!("invalid schedule expression: {raw}"))
}
