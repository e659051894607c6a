use std::ops::Range;
use std::sync::LazyLock;

use chrono::{NaiveTime, Timelike};
use itertools::Itertools;
use regex::{Captures, Regex};

use crate::model::Hours;

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];
const WEEKDAYS: Range<usize> = 0..5;
const WEEKEND: Range<usize> = 5..7;

const DAY: &str = r"(?:monday|mon|tuesday|tues|tue|wednesday|weds|wed|thursday|thurs|thur|thu|friday|fri|saturday|sat|sunday|sun)s?\b\.?";
const GROUP: &str = r"weekdays?\b|weekends?\b|daily\b|every\s*day\b|7\s*days(?:\s*a\s*week)?\b";
const DAY_SEP: &str = r"\s*(?:-|to|through|thru)\s*";
const LIST_SEP: &str = r"\s*(?:,|&|and|/)\s*";
const RANGE: &str =
    r"\d{1,2}(?::\d{2})?(?:\s*(?:am|pm))?\s*(?:-|to)\s*\d{1,2}(?::\d{2})?(?:\s*(?:am|pm)\b|\b)";

static DAY_SPEC: LazyLock<String> = LazyLock::new(|| {
    let term = format!("(?:{DAY}(?:{DAY_SEP}{DAY})?|{GROUP})");
    format!("{term}(?:{LIST_SEP}{term})*")
});

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<days>{spec})\s*:?\s*(?:(?:open|from)\s+)?(?:(?P<range>{RANGE})|(?P<allday>(?:open\s*)?24\s*hours)|(?P<closed>closed))",
        spec = DAY_SPEC.as_str()
    ))
    .unwrap()
});
static CLOSED_ON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\bclosed\s*(?:on\s+)?(?:all\s+)?(?P<days>{spec})",
        spec = DAY_SPEC.as_str()
    ))
    .unwrap()
});
static MORE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*(?:,|&|and|/|;)?\s*\b(?P<range>{RANGE})")).unwrap()
});
static RANGE_PARTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<h1>\d{1,2})(?::(?P<m1>\d{2}))?\s*(?P<p1>am|pm)?\s*(?:-|to)\s*(?P<h2>\d{1,2})(?::(?P<m2>\d{2}))?\s*(?P<p2>am|pm)?$",
    )
    .unwrap()
});
static DAY_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?P<a>{DAY})(?:{DAY_SEP}(?P<b>{DAY}))?|(?P<group>{GROUP})"
    ))
    .unwrap()
});
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NOON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bnoon\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy)]
struct Clock {
    hour: u32,
    minute: u32,
    meridiem: Option<Meridiem>,
}

/// Per-day opening ranges found in a blob of text.
#[derive(Debug, Clone, Default)]
pub struct WeekSchedule {
    ranges: [Vec<(NaiveTime, NaiveTime)>; 7],
    closed: [bool; 7],
}

impl WeekSchedule {
    pub fn has_ranges(&self) -> bool {
        self.ranges.iter().any(|r| !r.is_empty())
    }

    pub fn ranges(&self, day: usize) -> &[(NaiveTime, NaiveTime)] {
        &self.ranges[day]
    }

    /// Earliest open / latest close per bucket, plus closed days.
    pub fn summarize(&self) -> Hours {
        let (weekday_open, weekday_close) = self.bucket(WEEKDAYS);
        let (weekend_open, weekend_close) = self.bucket(WEEKEND);

        // Without any ranges, only days the text calls closed are reported.
        let closed_days = (0..7)
            .filter(|&d| {
                if self.has_ranges() {
                    self.ranges[d].is_empty()
                } else {
                    self.closed[d]
                }
            })
            .map(|d| DAY_NAMES[d])
            .join(", ");

        Hours {
            weekday_open,
            weekday_close,
            weekend_open,
            weekend_close,
            days_closed: closed_days,
        }
    }

    fn bucket(&self, days: Range<usize>) -> (String, String) {
        let ranges = || days.clone().flat_map(|d| self.ranges(d).iter());
        let open = ranges().map(|r| r.0).min();
        let close = ranges().map(|r| r.1).max();
        (
            open.map(format_time).unwrap_or_default(),
            close.map(format_time).unwrap_or_default(),
        )
    }
}

/// Parse and summarize in one go.
pub fn extract_hours(text: &str) -> Hours {
    parse_schedule(text).summarize()
}

pub fn parse_schedule(text: &str) -> WeekSchedule {
    let text = normalize(text);
    let mut week = WeekSchedule::default();

    for caps in ENTRY_RE.captures_iter(&text) {
        let days = expand_days(&caps["days"]);
        if days.is_empty() {
            continue;
        }

        if caps.name("closed").is_some() {
            for &d in &days {
                week.closed[d] = true;
            }
            continue;
        }

        let mut found = Vec::new();
        if caps.name("allday").is_some() {
            found.push((NaiveTime::default(), end_of_day()));
        } else if let Some(r) = caps.name("range").and_then(|m| parse_range(m.as_str())) {
            found.push(r);
        }

        // Split shifts: "9am-12pm, 1pm-5pm" after the same day spec.
        let mut rest = &text[caps.get(0).map_or(text.len(), |m| m.end())..];
        while let Some(more) = MORE_RANGE_RE.captures(rest) {
            if let Some(r) = parse_range(&more["range"]) {
                found.push(r);
            }
            rest = &rest[more.get(0).map_or(rest.len(), |m| m.end())..];
        }

        for &d in &days {
            week.ranges[d].extend(found.iter().copied());
        }
    }

    for caps in CLOSED_ON_RE.captures_iter(&text) {
        for d in expand_days(&caps["days"]) {
            week.closed[d] = true;
        }
    }

    for d in 0..7 {
        week.ranges[d].sort();
        week.ranges[d].dedup();
    }
    week
}

/// Lowercase, unify dashes and exotic spaces, spell out a.m./p.m./noon.
fn normalize(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' | '\u{2012}' | '\u{2212}' => '-',
            '\u{a0}' | '\u{2009}' | '\u{202f}' | '\u{2007}' => ' ',
            other => other,
        })
        .collect();
    let lowered = lowered.replace("a.m.", "am").replace("p.m.", "pm");
    let lowered = NOON_RE.replace_all(&lowered, "12:00 pm");
    WS_RE.replace_all(&lowered, " ").into_owned()
}

fn expand_days(spec: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for caps in DAY_TERM_RE.captures_iter(spec) {
        if let Some(group) = caps.name("group") {
            let g = group.as_str();
            if g.starts_with("weekday") {
                out.extend(WEEKDAYS);
            } else if g.starts_with("weekend") {
                out.extend(WEEKEND);
            } else {
                out.extend(0..7);
            }
            continue;
        }
        let Some(a) = caps.name("a").and_then(|m| day_index(m.as_str())) else {
            continue;
        };
        match caps.name("b").and_then(|m| day_index(m.as_str())) {
            Some(b) => {
                let mut d = a;
                loop {
                    out.push(d);
                    if d == b {
                        break;
                    }
                    d = (d + 1) % 7;
                }
            }
            None => out.push(a),
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn day_index(token: &str) -> Option<usize> {
    let t = token.trim_end_matches('.');
    match t.get(..2)? {
        "mo" => Some(0),
        "tu" => Some(1),
        "we" => Some(2),
        "th" => Some(3),
        "fr" => Some(4),
        "sa" => Some(5),
        "su" => Some(6),
        _ => None,
    }
}

fn parse_range(raw: &str) -> Option<(NaiveTime, NaiveTime)> {
    let caps = RANGE_PARTS_RE.captures(raw.trim())?;
    let start = clock(&caps, "h1", "m1", "p1")?;
    let end = clock(&caps, "h2", "m2", "p2")?;
    resolve_range(start, end)
}

fn clock(caps: &Captures<'_>, h: &str, m: &str, p: &str) -> Option<Clock> {
    let hour = caps.name(h)?.as_str().parse().ok()?;
    let minute = match caps.name(m) {
        Some(v) => v.as_str().parse().ok()?,
        None => 0,
    };
    let meridiem = caps.name(p).map(|v| {
        if v.as_str() == "am" {
            Meridiem::Am
        } else {
            Meridiem::Pm
        }
    });
    Some(Clock {
        hour,
        minute,
        meridiem,
    })
}

/// Fill in missing am/pm so that the range reads forward.
fn resolve_range(start: Clock, end: Clock) -> Option<(NaiveTime, NaiveTime)> {
    let (open, close) = match (start.meridiem, end.meridiem) {
        (Some(a), Some(b)) => (twelve_hour(start, a)?, twelve_hour(end, b)?),
        (None, Some(b)) => {
            let close = twelve_hour(end, b)?;
            let open = if start.hour > 12 {
                twenty_four_hour(start)?
            } else {
                let same = twelve_hour(start, b)?;
                if same > close {
                    twelve_hour(start, Meridiem::Am)?
                } else {
                    same
                }
            };
            (open, close)
        }
        (Some(a), None) => {
            let open = twelve_hour(start, a)?;
            let close = if end.hour > 12 {
                twenty_four_hour(end)?
            } else {
                let same = twelve_hour(end, a)?;
                if same <= open {
                    twelve_hour(end, Meridiem::Pm)?
                } else {
                    same
                }
            };
            (open, close)
        }
        (None, None) => {
            let open = twenty_four_hour(start)?;
            let mut close = twenty_four_hour(end)?;
            if close <= open && end.hour < 12 {
                close = twenty_four_hour(Clock {
                    hour: end.hour + 12,
                    ..end
                })?;
            }
            (open, close)
        }
    };
    (close > open).then_some((open, close))
}

fn twelve_hour(c: Clock, meridiem: Meridiem) -> Option<NaiveTime> {
    if !(1..=12).contains(&c.hour) {
        return None;
    }
    let hour = match (meridiem, c.hour) {
        (Meridiem::Am, 12) => 0,
        (Meridiem::Am, h) => h,
        (Meridiem::Pm, 12) => 12,
        (Meridiem::Pm, h) => h + 12,
    };
    NaiveTime::from_hms_opt(hour, c.minute, 0)
}

fn twenty_four_hour(c: Clock) -> Option<NaiveTime> {
    if c.hour == 24 && c.minute == 0 {
        return Some(end_of_day());
    }
    NaiveTime::from_hms_opt(c.hour, c.minute, 0)
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::default())
}

/// `08:00 AM` style.
pub fn format_time(t: NaiveTime) -> String {
    let (pm, hour) = t.hour12();
    format!("{:02}:{:02} {}", hour, t.minute(), if pm { "PM" } else { "AM" })
}
