//! current_datetime: date and/or time in the local zone or a fixed UTC offset.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{opt_str_arg, Tool};

const DATE_FORMAT: &str = "%B %d, %Y";
const TIME_FORMAT_24H: &str = "%H:%M:%S";
const TIME_FORMAT_12H: &str = "%I:%M:%S %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeRequest {
    Date,
    Time,
    Both,
}

impl DateTimeRequest {
    fn parse(raw: Option<&str>) -> anyhow::Result<Self> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("both") => Ok(Self::Both),
            Some("date") => Ok(Self::Date),
            Some("time") => Ok(Self::Time),
            Some(other) => anyhow::bail!("request must be 'date', 'time' or 'both', got '{}'", other),
        }
    }
}

/// Parse `UTC`, `Z`, `+05:30`, `-8`, `+0530` or `UTC+3` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let s = raw.trim();
    let upper = s.to_ascii_uppercase();
    let s = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);
    if s.is_empty() || s == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow::anyhow!("invalid offset"));
    }

    let (sign, digits) = if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else {
        anyhow::bail!("UTC offset '{}' must start with + or -", raw);
    };

    // Only ASCII digits and one optional colon past the sign, so the
    // byte split below always lands on a char boundary.
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == ':') {
        anyhow::bail!("invalid UTC offset '{}'", raw);
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        anyhow::bail!("invalid UTC offset '{}'", raw);
    }
    let hours: i32 = hours
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hours in UTC offset '{}'", raw))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minutes in UTC offset '{}'", raw))?;
    if hours > 14 || minutes >= 60 {
        anyhow::bail!("UTC offset '{}' is out of range", raw);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("UTC offset '{}' is out of range", raw))
}

/// Render `now` for the given request.
pub fn format_datetime(now: &DateTime<FixedOffset>, request: DateTimeRequest, hour24: bool) -> String {
    let time_format = if hour24 { TIME_FORMAT_24H } else { TIME_FORMAT_12H };
    let zone = now.format("UTC%:z");
    let date = now.format(DATE_FORMAT);
    let time = now.format(time_format);
    match request {
        DateTimeRequest::Date => format!("Date: {date}"),
        DateTimeRequest::Time => format!("Time: {time} ({zone})"),
        DateTimeRequest::Both => format!("Date: {date}\nTime: {time} ({zone})"),
    }
}

pub struct CurrentDateTimeTool {
    hour24: bool,
}

impl CurrentDateTimeTool {
    pub fn new(hour24: bool) -> Self {
        Self { hour24 }
    }
}

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and/or time, either in the server's local time zone or at an explicit UTC offset."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "enum": ["date", "time", "both"],
                    "description": "What to report (default: both)"
                },
                "utc_offset": {
                    "type": "string",
                    "description": "Offset such as '+05:30', '-08:00' or 'UTC'. Omit for local time."
                },
                "hour24": {
                    "type": "boolean",
                    "description": "Use a 24-hour clock (default from server config)"
                }
            }
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let request = DateTimeRequest::parse(opt_str_arg(&args, "request"))?;
        let hour24 = args
            .get("hour24")
            .and_then(Value::as_bool)
            .unwrap_or(self.hour24);

        let now = match opt_str_arg(&args, "utc_offset") {
            Some(raw) => Utc::now().with_timezone(&parse_utc_offset(raw)?),
            None => Local::now().fixed_offset(),
        };
        Ok(format_datetime(&now, request, hour24))
    }
}
