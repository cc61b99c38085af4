//! Timeouts written in Go's `time.Duration` syntax, e.g. `30s` or `1m30s`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeout(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("timeouts may not be negative")]
    Negative,

    #[error("invalid unit {0:?}: expected one of 'ns', 'us', 'ms', 's', 'm', or 'h'")]
    InvalidUnit(String),

    #[error("missing a unit after {0:?}")]
    NoUnit(String),

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("duration is too large")]
    Overflow,
}

// === impl Timeout ===

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl From<Timeout> for Duration {
    fn from(Timeout(d): Timeout) -> Self {
        d
    }
}

impl FromStr for Timeout {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = match s.strip_prefix('-') {
            Some(_) => return Err(ParseError::Negative),
            None => s.strip_prefix('+').unwrap_or(s),
        };
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }
        if rest == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_at = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(|| ParseError::NoUnit(rest.to_string()))?;
            let (value, tail) = rest.split_at(unit_at);
            let unit_len = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);

            let value = value.parse::<f64>()?;
            let term = Duration::try_from_secs_f64(unit_base(unit)?.as_secs_f64() * value)
                .map_err(|_| ParseError::Overflow)?;
            total = total.checked_add(term).ok_or(ParseError::Overflow)?;
            rest = tail;
        }

        Ok(Self(total))
    }
}

fn unit_base(unit: &str) -> Result<Duration, ParseError> {
    Ok(match unit {
        "ns" => Duration::from_nanos(1),
        // Both the micro sign and the Greek letter mu are accepted.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
        "ms" => Duration::from_millis(1),
        "s" => Duration::from_secs(1),
        "m" => Duration::from_secs(60),
        "h" => Duration::from_secs(60 * 60),
        unit => return Err(ParseError::InvalidUnit(unit.to_string())),
    })
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();
        if nanos != 0 {
            return write!(f, "{}ms", self.0.as_millis());
        }
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            write!(f, "{h}h")?;
        }
        if m > 0 {
            write!(f, "{m}m")?;
        }
        if s > 0 || secs == 0 {
            write!(f, "{s}s")?;
        }
        Ok(())
    }
}

impl Serialize for Timeout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Timeout;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as \"30s\" or \"1m30s\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Timeout, E> {
                value.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}
