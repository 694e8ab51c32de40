//! Declarative quotas such as `"30/h"`.

use std::{fmt, str::FromStr, time::Duration};

use crate::error::RateLimitError;

/// Error returned for a rate spec that is not `<positive integer>/<s|m|h|d>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rate spec '{spec}': {reason}")]
pub struct InvalidRateSpec {
    /// The input as given.
    pub spec: String,
    /// What is wrong with it.
    pub reason: &'static str,
}

/// A quota: at most `limit` operations per `period_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateSpec {
    limit: u64,
    period_secs: u64,
}

impl RateSpec {
    /// Parses `"<count>/<unit>"`, where unit is one of `s`, `m`, `h` or `d` in any case.
    ///
    /// Whitespace, signs and anything else around the two parts is rejected.
    pub fn parse(spec: &str) -> Result<Self, InvalidRateSpec> {
        let invalid = |reason| InvalidRateSpec {
            spec: spec.to_string(),
            reason,
        };

        if spec.is_empty() {
            return Err(invalid("empty rate spec"));
        }

        let (count, unit) = spec.split_once('/').ok_or_else(|| invalid("expected '<count>/<unit>'"))?;

        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("count must be a positive integer"));
        }

        let limit: u64 = count.parse().map_err(|_| invalid("count is too large"))?;

        if limit == 0 {
            return Err(invalid("count must be greater than zero"));
        }

        let period_secs = match unit.to_ascii_lowercase().as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "" => return Err(invalid("missing time unit")),
            _ => return Err(invalid("unknown time unit, expected one of s, m, h, d")),
        };

        Ok(Self { limit, period_secs })
    }

    /// Maximum number of operations per period.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the period in seconds.
    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Length of the period.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Parses every quota of a protected operation. At least one is required.
pub fn parse_rates<T: AsRef<str>>(rates: &[T]) -> Result<Vec<RateSpec>, RateLimitError> {
    if rates.is_empty() {
        return Err(RateLimitError::MissingRates);
    }

    let specs = rates
        .iter()
        .map(|rate| RateSpec::parse(rate.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(specs)
}

impl FromStr for RateSpec {
    type Err = InvalidRateSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period_secs {
            1 => "s",
            60 => "m",
            3_600 => "h",
            _ => "d",
        };

        write!(f, "{}/{unit}", self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(spec: &str) -> (u64, u64) {
        let spec = RateSpec::parse(spec).unwrap();
        (spec.limit(), spec.period_secs())
    }

    #[test]
    fn parses_every_unit() {
        assert_eq!(parsed("30/h"), (30, 3600));
        assert_eq!(parsed("5/s"), (5, 1));
        assert_eq!(parsed("10/m"), (10, 60));
        assert_eq!(parsed("2/d"), (2, 86400));
    }

    #[test]
    fn unit_is_case_insensitive() {
        assert_eq!(RateSpec::parse("100/H"), RateSpec::parse("100/h"));
        assert_eq!(parsed("7/D"), (7, 86400));
    }

    #[test]
    fn parsing_is_repeatable() {
        assert_eq!(RateSpec::parse("30/h"), RateSpec::parse("30/h"));
        assert_eq!("30/h".parse::<RateSpec>(), RateSpec::parse("30/h"));
    }

    #[test]
    fn rejects_malformed_specs() {
        for spec in [
            "", "30", "30/", "/h", "30/x", "abc/h", "0/h", "-1/h", "+5/h", " 5/h", "5/h ", "5 /h", "5/ h", "5/hour",
            "5/h/h", "1.5/h", "99999999999999999999999/h",
        ] {
            assert!(RateSpec::parse(spec).is_err(), "'{spec}' should be rejected");
        }
    }

    #[test]
    fn error_names_the_input() {
        let error = RateSpec::parse("30/x").unwrap_err();

        insta::assert_snapshot!(error.to_string(), @"invalid rate spec '30/x': unknown time unit, expected one of s, m, h, d");
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(RateSpec::parse("100/H").unwrap().to_string(), "100/h");
        assert_eq!(RateSpec::parse("5/s").unwrap().to_string(), "5/s");
        assert_eq!(RateSpec::parse("1/D").unwrap().to_string(), "1/d");
    }

    #[test]
    fn parse_rates_needs_at_least_one() {
        let none: [&str; 0] = [];

        assert!(matches!(parse_rates(&none), Err(RateLimitError::MissingRates)));
        assert!(matches!(parse_rates(&["3/h", "2/x"]), Err(RateLimitError::InvalidRateSpec(_))));
        assert_eq!(parse_rates(&["3/h", "2/m"]).unwrap().len(), 2);
    }

    #[test]
    fn period_as_duration() {
        assert_eq!(RateSpec::parse("1/m").unwrap().period(), Duration::from_secs(60));
    }
}
