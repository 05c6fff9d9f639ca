//! Leading date tokens in folder names and RFC3339 time fields in sidecars.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveTime, SecondsFormat, TimeZone};
use regex::{Captures, Regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Offset is part of the token.
    Rfc3339,
    /// Calendar fields only, interpreted in the local timezone.
    Local,
}

struct DateFormat {
    name: &'static str,
    pattern: Regex,
    layout: Layout,
}

// Order is priority: zoned before local, most specific first. Every pattern
// must be followed by whitespace or the end of the name.
const FORMAT_SPECS: &[(&str, &str, Layout)] = &[
    (
        "rfc3339-nano",
        r"^(?P<all>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{1,9}(?:Z|[+-]\d{2}:\d{2}))(?:\s+|$)",
        Layout::Rfc3339,
    ),
    (
        "rfc3339",
        r"^(?P<all>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:Z|[+-]\d{2}:\d{2}))(?:\s+|$)",
        Layout::Rfc3339,
    ),
    (
        "datetime-nano",
        r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})T(?P<hh>\d{2}):(?P<mm>\d{2}):(?P<ss>\d{2})\.(?P<frac>\d{1,9})(?:\s+|$)",
        Layout::Local,
    ),
    (
        "datetime",
        r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})T(?P<hh>\d{2}):(?P<mm>\d{2}):(?P<ss>\d{2})(?:\s+|$)",
        Layout::Local,
    ),
    (
        "datetime-space",
        r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2}) (?P<hh>\d{2}):(?P<mm>\d{2}):(?P<ss>\d{2})(?:\s+|$)",
        Layout::Local,
    ),
    ("year-monthday", r"^(?P<y>\d{4})-(?P<m>\d{2})(?P<d>\d{2})(?:\s+|$)", Layout::Local),
    ("iso-date", r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})(?:\s+|$)", Layout::Local),
    ("compact", r"^(?P<y>\d{4})(?P<m>\d{2})(?P<d>\d{2})(?:\s+|$)", Layout::Local),
    ("slash", r"^(?P<y>\d{4})/(?P<m>\d{2})/(?P<d>\d{2})(?:\s+|$)", Layout::Local),
    ("dot", r"^(?P<y>\d{4})\.(?P<m>\d{2})\.(?P<d>\d{2})(?:\s+|$)", Layout::Local),
    ("slash-short", r"^(?P<y>\d{4})/(?P<m>\d{1,2})/(?P<d>\d{1,2})(?:\s+|$)", Layout::Local),
    ("dot-short", r"^(?P<y>\d{4})\.(?P<m>\d{1,2})\.(?P<d>\d{1,2})(?:\s+|$)", Layout::Local),
];

lazy_static::lazy_static! {
    static ref DATE_FORMATS: Vec<DateFormat> = FORMAT_SPECS
        .iter()
        .map(|(name, pattern, layout)| DateFormat {
            name,
            pattern: Regex::new(pattern).expect("date token pattern is valid"),
            layout: *layout,
        })
        .collect();
}

/// Splits a leading date token off `name`.
///
/// Returns the parsed instant and the trimmed remainder. Formats are tried in
/// priority order; a token that matches structurally but is not a valid
/// calendar date falls through to the next format.
pub fn split_leading_date(name: &str) -> Option<(DateTime<FixedOffset>, &str)> {
    let name = name.trim_start();
    for format in DATE_FORMATS.iter() {
        let Some(caps) = format.pattern.captures(name) else {
            continue;
        };
        let parsed = match format.layout {
            Layout::Rfc3339 => caps
                .name("all")
                .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok()),
            Layout::Local => local_from_captures(&caps),
        };
        match parsed {
            Some(instant) => {
                let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
                return Some((instant, name[consumed..].trim()));
            }
            None => {
                tracing::debug!("Date token in {:?} matched {} but is not a valid date", name, format.name);
            }
        }
    }
    None
}

fn local_from_captures(caps: &Captures<'_>) -> Option<DateTime<FixedOffset>> {
    let field = |key: &str| -> Option<u32> {
        match caps.name(key) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let year = caps.name("y")?.as_str().parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field("m")?, field("d")?)?;

    let nanos = match caps.name("frac") {
        Some(m) => {
            // right-pad to nanosecond precision: ".5" is 500ms
            let digits = m.as_str();
            let padded = format!("{:0<9}", digits);
            padded.parse::<u32>().ok()?
        }
        None => 0,
    };
    let time = NaiveTime::from_hms_nano_opt(field("hh")?, field("mm")?, field("ss")?, nanos)?;

    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Formats an instant the way sidecar time fields are stored.
pub fn format_rfc3339(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Formats the `YYYY-MMDD` date token used in project folder names.
pub fn format_folder_date(value: &DateTime<FixedOffset>) -> String {
    value.format("%Y-%m%d").to_string()
}

/// Serde adapter for optional time fields: RFC3339 with nanoseconds, the
/// empty string meaning unset.
pub mod rfc3339_opt {
    use chrono::{DateTime, FixedOffset};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<FixedOffset>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(instant) => serializer.serialize_str(&super::format_rfc3339(instant)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = Option::<String>::deserialize(deserializer)?;
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw).map(Some).map_err(D::Error::custom),
        }
    }
}
