//! Duration literals: an optional sign followed by one or more `<number><unit>`
//! pairs, e.g. `-60m`, `1h30m`, `1.5s`, `250ms`. Units are ns, us (or µs), ms, s, m, h.

use chrono::TimeDelta;

const UNITS: [(&str, f64); 7] = [
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

pub fn parse_duration(text: &str) -> Result<TimeDelta, String> {
    let original = text;
    let mut s = text.trim();
    let negative = if let Some(rest) = s.strip_prefix('-') {
        s = rest;
        true
    } else {
        s = s.strip_prefix('+').unwrap_or(s);
        false
    };
    if s == "0" {
        return Ok(TimeDelta::zero());
    }
    if s.is_empty() {
        return Err(format!("invalid duration '{}'", original));
    }

    let mut nanos = 0f64;
    while !s.is_empty() {
        let num_len = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let number: f64 = s[..num_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", original))?;
        s = &s[num_len..];
        let unit_len = s
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(s.len());
        let unit = &s[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| {
                if unit.is_empty() {
                    format!("missing unit in duration '{}'", original)
                } else {
                    format!("unknown unit '{}' in duration '{}'", unit, original)
                }
            })?;
        nanos += number * scale;
        s = &s[unit_len..];
    }

    if nanos > i64::MAX as f64 {
        return Err(format!("duration '{}' out of range", original));
    }
    let nanos = nanos.round() as i64;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

/// Formats using the largest unit that represents the duration exactly.
pub fn format_duration(d: TimeDelta) -> String {
    let nanos = d.num_nanoseconds().unwrap_or(i64::MAX);
    if nanos == 0 {
        return "0s".to_string();
    }
    for (unit, scale) in [
        ("h", 3_600_000_000_000i64),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
    ] {
        if nanos % scale == 0 {
            return format!("{}{}", nanos / scale, unit);
        }
    }
    format!("{}ns", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse_duration("-60m").unwrap(), TimeDelta::minutes(-60));
        assert_eq!(parse_duration("5s").unwrap(), TimeDelta::seconds(5));
        assert_eq!(parse_duration("1h30m").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("1.5s").unwrap(), TimeDelta::milliseconds(1500));
        assert_eq!(parse_duration("250ms").unwrap(), TimeDelta::milliseconds(250));
        assert_eq!(parse_duration("0").unwrap(), TimeDelta::zero());
        assert_eq!(parse_duration("-2h").unwrap(), TimeDelta::hours(-2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5 days").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_duration(TimeDelta::minutes(-60)), "-1h");
        assert_eq!(format_duration(TimeDelta::minutes(-15)), "-15m");
        assert_eq!(format_duration(TimeDelta::milliseconds(1500)), "1500ms");
        assert_eq!(format_duration(TimeDelta::zero()), "0s");
    }
}
