use std::fmt;
use std::str::FromStr;

pub const NANOSECOND: i64 = 1;
pub const MICROSECOND: i64 = 1_000;
pub const MILLISECOND: i64 = 1_000_000;
pub const SECOND: i64 = 1_000_000_000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

/// Unit a timestamp is expressed in. `Unset` means "no conversion".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    #[default]
    Unset,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds; `Unset` counts as nanoseconds.
    pub fn nanos(self) -> i64 {
        match self {
            TimeUnit::Unset | TimeUnit::Nanosecond => NANOSECOND,
            TimeUnit::Microsecond => MICROSECOND,
            TimeUnit::Millisecond => MILLISECOND,
            TimeUnit::Second => SECOND,
            TimeUnit::Minute => MINUTE,
            TimeUnit::Hour => HOUR,
            TimeUnit::Day => DAY,
        }
    }

    pub fn is_set(self) -> bool {
        self != TimeUnit::Unset
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(TimeUnit::Unset),
            "ns" => Ok(TimeUnit::Nanosecond),
            "us" | "µs" | "μs" => Ok(TimeUnit::Microsecond),
            "ms" => Ok(TimeUnit::Millisecond),
            "s" => Ok(TimeUnit::Second),
            "m" => Ok(TimeUnit::Minute),
            "h" => Ok(TimeUnit::Hour),
            "d" => Ok(TimeUnit::Day),
            other => Err(format!("invalid time unit '{other}'")),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Unset => "",
            TimeUnit::Nanosecond => "ns",
            TimeUnit::Microsecond => "us",
            TimeUnit::Millisecond => "ms",
            TimeUnit::Second => "s",
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
        };
        f.write_str(s)
    }
}

/// Converts `t` from one unit to another. Unset units leave `t` untouched.
pub fn convert_timestamp(t: i64, from: TimeUnit, to: TimeUnit) -> i64 {
    if !from.is_set() || !to.is_set() || from == to {
        return t;
    }
    let (f, to) = (from.nanos(), to.nanos());
    if f > to {
        t.saturating_mul(f / to)
    } else {
        t / (to / f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units() {
        assert_eq!("ms".parse::<TimeUnit>().unwrap(), TimeUnit::Millisecond);
        assert_eq!("".parse::<TimeUnit>().unwrap(), TimeUnit::Unset);
        assert!("fortnight".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn conversions() {
        assert_eq!(convert_timestamp(1_500, TimeUnit::Millisecond, TimeUnit::Second), 1);
        assert_eq!(convert_timestamp(2, TimeUnit::Second, TimeUnit::Millisecond), 2_000);
        assert_eq!(convert_timestamp(7, TimeUnit::Unset, TimeUnit::Second), 7);
        assert_eq!(TimeUnit::Unset.nanos(), 1);
    }
}
