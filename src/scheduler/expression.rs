//! Cron expression normalisation

use std::str::FromStr;

use cron::Schedule;

use crate::error::{Error, Result};

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite an expression into the 6/7-field form the `cron` crate parses
///
/// Standard 5-field expressions get a `0` seconds field, and their numeric
/// day-of-week values (0 or 7 = Sunday) are rewritten as names because the
/// `cron` crate counts weekdays from 1.
pub fn normalize_expression(expression: &str) -> Result<String> {
    let expression = expression.trim();

    let descriptor = match expression {
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@weekly" => Some("0 0 0 * * Sun"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@hourly" => Some("0 0 * * * *"),
        _ => None,
    };
    if let Some(normalized) = descriptor {
        return Ok(normalized.to_string());
    }
    if expression.starts_with('@') {
        return Err(Error::schedule(format!(
            "unsupported cron descriptor {:?}",
            expression
        )));
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let weekday = weekday_names(fields[4]);
            Ok(format!("0 {} {}", fields[..4].join(" "), weekday))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(Error::schedule(format!(
            "cron expression {:?} has {} fields, expected 5, 6 or 7",
            expression, n
        ))),
    }
}

/// Parse an expression after normalisation
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized)
        .map_err(|e| Error::schedule(format!("invalid cron expression {:?}: {}", expression, e)))
}

/// Replace numeric weekdays in a 5-field day-of-week field with names
fn weekday_names(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = range
                .split('-')
                .map(|part| match part.parse::<usize>() {
                    Ok(n) if n <= 7 => WEEKDAYS[n % 7].to_string(),
                    _ => part.to_string(),
                })
                .collect::<Vec<_>>()
                .join("-");
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

    use super::*;

    #[test]
    fn test_five_fields_get_seconds() {
        assert_eq!(normalize_expression("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_expression("0 3 * * 1-5").unwrap(), "0 0 3 * * Mon-Fri");
        assert_eq!(normalize_expression("0 3 * * 0,6").unwrap(), "0 0 3 * * Sun,Sat");
    }

    #[test]
    fn test_six_and_seven_fields_pass_through() {
        assert_eq!(normalize_expression("30 0 * * * *").unwrap(), "30 0 * * * *");
        assert_eq!(
            normalize_expression(" 0 0 12 * * Mon 2030 ").unwrap(),
            "0 0 12 * * Mon 2030"
        );
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(normalize_expression("@hourly").unwrap(), "0 0 * * * *");
        assert_eq!(
            normalize_expression("@midnight").unwrap(),
            normalize_expression("@daily").unwrap()
        );
        assert!(normalize_expression("@every 5m").is_err());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(parse_schedule("* *").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
        assert!(parse_schedule("").is_err());
    }

    #[test]
    fn test_parsed_schedule_fires_on_sunday() {
        let schedule = parse_schedule("15 2 * * 0").unwrap();
        // 2024-01-01 was a Monday
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let next = schedule.after(&start).next().unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!((next.hour(), next.minute(), next.second()), (2, 15, 0));
    }
}
