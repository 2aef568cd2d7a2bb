//! Turns scraped earnings date tokens such as `"Jul 25, 2024, 4 PMEDT"` into
//! UTC instants.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use thiserror::Error;

/// Tokens this short are table filler ("N/A", "-", "TBD"), not dates.
const NOISE_MAX_CHARS: usize = 4;

/// US-Eastern abbreviations and their offsets from UTC in hours.
const EASTERN_ZONES: [(&str, i32); 2] = [("EST", -5), ("EDT", -4)];

const DATE_FORMAT: &str = "%b %d, %Y";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("no AM/PM marker in {token:?}")]
    MissingMeridiem { token: String },
    #[error("invalid hour {hour:?} in {token:?}")]
    InvalidTime { token: String, hour: String },
    #[error("invalid date {date:?} in {token:?}: {source}")]
    InvalidDate {
        token: String,
        date: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Result of normalizing every token scraped for one stock.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub instants: BTreeSet<DateTime<Utc>>,
    pub failures: Vec<(String, NormalizeError)>,
    pub ignored: usize,
}

/// Normalizes a single raw token.
///
/// Returns `Ok(None)` for noise tokens (four characters or fewer after
/// trimming). Tokens ending in `EST`/`EDT` are read at that fixed Eastern
/// offset; anything else is read as UTC.
pub fn normalize_token(raw: &str) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let token = raw.trim();
    if token.chars().count() <= NOISE_MAX_CHARS {
        return Ok(None);
    }

    let spaced = space_markers(token);
    let mut words: Vec<&str> = spaced.split_whitespace().collect();

    let offset = match words.last().copied() {
        Some(word) if is_zone_word(word) => {
            words.pop();
            eastern_offset(word).unwrap_or_else(utc_offset)
        }
        _ => utc_offset(),
    };

    let meridiem = match words.pop() {
        Some(word @ ("AM" | "PM")) => word,
        _ => {
            return Err(NormalizeError::MissingMeridiem {
                token: token.to_string(),
            })
        }
    };
    let hour = words.pop().unwrap_or_default();
    let time = parse_clock(hour, meridiem).ok_or_else(|| NormalizeError::InvalidTime {
        token: token.to_string(),
        hour: hour.to_string(),
    })?;

    let date_text = words.join(" ");
    let date_text = date_text.trim_end_matches(',');
    let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT).map_err(|source| {
        NormalizeError::InvalidDate {
            token: token.to_string(),
            date: date_text.to_string(),
            source,
        }
    })?;

    let local = NaiveDateTime::new(date, time);
    let instant = offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc));
    Ok(instant)
}

/// Normalizes a batch. A token that fails is recorded and skipped; the rest
/// still contribute. Tokens landing on the same instant collapse into one.
pub fn normalize_tokens<I, S>(tokens: I) -> NormalizedBatch
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut batch = NormalizedBatch::default();
    for token in tokens {
        let token = token.as_ref();
        match normalize_token(token) {
            Ok(Some(instant)) => {
                batch.instants.insert(instant);
            }
            Ok(None) => batch.ignored += 1,
            Err(err) => batch.failures.push((token.trim().to_string(), err)),
        }
    }
    batch
}

/// Yahoo glues markers together ("4 PMEDT", "4PMUTC"); pull them apart.
fn space_markers(token: &str) -> String {
    let mut out = token
        .replace("AM", " AM ")
        .replace("PM", " PM ")
        .replace("UTC", " UTC");
    for (abbr, _) in EASTERN_ZONES {
        if out.ends_with(abbr) {
            let cut = out.len() - abbr.len();
            out.insert(cut, ' ');
            break;
        }
    }
    out
}

fn is_zone_word(word: &str) -> bool {
    word != "AM" && word != "PM" && word.chars().all(|c| c.is_ascii_alphabetic())
}

fn eastern_offset(word: &str) -> Option<FixedOffset> {
    EASTERN_ZONES
        .iter()
        .find(|(abbr, _)| *abbr == word)
        .and_then(|(_, hours)| FixedOffset::east_opt(hours * 3600))
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn parse_clock(hour: &str, meridiem: &str) -> Option<NaiveTime> {
    let (h, m) = match hour.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (hour.parse::<u32>().ok()?, 0),
    };
    if !(1..=12).contains(&h) {
        return None;
    }
    let h24 = match meridiem {
        "PM" => h % 12 + 12,
        _ => h % 12,
    };
    NaiveTime::from_hms_opt(h24, m, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0)
            .single()
            .expect("valid test instant")
    }

    #[test]
    fn eastern_standard_time_converts_to_utc() {
        let got = normalize_token("Jan 02, 2024, 4PM EST").expect("parse");
        assert_eq!(got, Some(utc(2024, 1, 2, 21)));
    }

    #[test]
    fn eastern_daylight_suffix_glued_to_meridiem() {
        let got = normalize_token("Jul 25, 2024, 4 PMEDT").expect("parse");
        assert_eq!(got, Some(utc(2024, 7, 25, 20)));

        let morning = normalize_token("Apr 24, 2024, 8 AMEDT").expect("parse");
        assert_eq!(morning, Some(utc(2024, 4, 24, 12)));
    }

    #[test]
    fn bare_utc_marker_gets_separated() {
        assert_eq!(
            normalize_token("Jan 02, 2024, 4PM UTC").expect("parse"),
            Some(utc(2024, 1, 2, 16))
        );
        assert_eq!(
            normalize_token("Jan 02, 2024, 4 PMUTC").expect("parse"),
            Some(utc(2024, 1, 2, 16))
        );
    }

    #[test]
    fn missing_zone_is_read_as_utc() {
        assert_eq!(
            normalize_token("Jan 02, 2024, 4 PM").expect("parse"),
            Some(utc(2024, 1, 2, 16))
        );
    }

    #[test]
    fn noon_and_midnight_follow_twelve_hour_clock() {
        assert_eq!(
            normalize_token("Mar 01, 2024, 12 AM UTC").expect("parse"),
            Some(utc(2024, 3, 1, 0))
        );
        assert_eq!(
            normalize_token("Mar 01, 2024, 12 PM UTC").expect("parse"),
            Some(utc(2024, 3, 1, 12))
        );
    }

    #[test]
    fn short_tokens_are_noise_not_failures() {
        assert!(normalize_token("N/A").expect("noise").is_none());
        assert!(normalize_token("  -  ").expect("noise").is_none());
        assert!(normalize_token("TBD").expect("noise").is_none());
    }

    #[test]
    fn malformed_tokens_report_an_error() {
        assert!(matches!(
            normalize_token("Jan 02, 2024"),
            Err(NormalizeError::MissingMeridiem { .. })
        ));
        assert!(matches!(
            normalize_token("Foo 02, 2024, 4 PM EST"),
            Err(NormalizeError::InvalidDate { .. })
        ));
        assert!(matches!(
            normalize_token("Jan 02, 2024, 13 PM EST"),
            Err(NormalizeError::InvalidTime { .. })
        ));
    }

    #[test]
    fn batch_dedups_and_keeps_going_past_failures() {
        let batch = normalize_tokens([
            "Jan 02, 2024, 4PM EST",
            "Jan 02, 2024, 9 PMUTC",
            "garbage token",
            "N/A",
            "Apr 03, 2024, 5 PMEDT",
        ]);

        assert_eq!(
            batch.instants.into_iter().collect::<Vec<_>>(),
            vec![utc(2024, 1, 2, 21), utc(2024, 4, 3, 21)]
        );
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].0, "garbage token");
        assert_eq!(batch.ignored, 1);
    }
}
