//! String and number formats for the `format` keyword.
//!
//! A format either checks a value (regex, built-in predicate or user closure)
//! and optionally orders two values of the format, which is what the
//! `formatMinimum` family of keywords compares with.
use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::CompileError;
use crate::exec::Val;
use crate::types::JsonType;

/// User-supplied check. Errors are fatal runtime failures, not validation
/// failures.
pub type FormatFn = Arc<dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync>;

type Compare = fn(&str, &str) -> Option<Ordering>;

enum Check {
    Regex(Regex),
    Str(fn(&str) -> bool),
    Num(fn(f64) -> bool),
    Custom(FormatFn),
}

pub struct FormatDef {
    pub name: String,
    /// Values of other types pass.
    pub applies_to: JsonType,
    check: Check,
    compare: Option<Compare>,
}

impl fmt::Debug for FormatDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDef")
            .field("name", &self.name)
            .field("applies_to", &self.applies_to)
            .field("comparable", &self.compare.is_some())
            .finish()
    }
}

impl FormatDef {
    /// A string format defined by a pattern.
    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Self, CompileError> {
        let re = Regex::new(pattern)
            .map_err(|e| CompileError::Regex { pattern: pattern.to_string(), reason: e.to_string() })?;
        Ok(Self { name: name.into(), applies_to: JsonType::String, check: Check::Regex(re), compare: None })
    }

    /// A format checked by a closure over values of `applies_to`.
    pub fn predicate(
        name: impl Into<String>,
        applies_to: JsonType,
        check: impl Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), applies_to, check: Check::Custom(Arc::new(check)), compare: None }
    }

    fn string(name: &str, check: fn(&str) -> bool) -> Self {
        Self { name: name.to_string(), applies_to: JsonType::String, check: Check::Str(check), compare: None }
    }

    fn number(name: &str, check: fn(f64) -> bool) -> Self {
        Self { name: name.to_string(), applies_to: JsonType::Number, check: Check::Num(check), compare: None }
    }

    fn with_compare(mut self, compare: Compare) -> Self {
        self.compare = Some(compare);
        self
    }

    pub fn is_comparable(&self) -> bool {
        self.compare.is_some()
    }

    fn applies(&self, value: &Val<'_>) -> bool {
        match (self.applies_to, value.json_type()) {
            (JsonType::Number, Some(t)) => t == JsonType::Number || t == JsonType::Integer,
            (expected, Some(t)) => expected == t,
            (_, None) => false,
        }
    }

    pub fn test(&self, value: &Val<'_>) -> anyhow::Result<bool> {
        if !self.applies(value) {
            return Ok(true);
        }
        Ok(match &self.check {
            Check::Regex(re) => value.as_str().is_none_or(|s| re.is_match(s)),
            Check::Str(f) => value.as_str().is_none_or(f),
            Check::Num(f) => value.as_f64().is_none_or(f),
            Check::Custom(f) => return f(&value.to_json()),
        })
    }

    /// Order `a` against `b`, or `None` when either is not a valid value of
    /// this format.
    pub fn compare(&self, a: &Val<'_>, b: &Val<'_>) -> Option<Ordering> {
        let compare = self.compare?;
        let (a, b) = (a.as_str()?, b.as_str()?);
        compare(a, b)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILT-IN FORMATS
// ————————————————————————————————————————————————————————————————————————————

static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d\d\d\d)-(\d\d)-(\d\d)$").unwrap());
static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d\d):(\d\d):(\d\d(?:\.\d+)?)(z|([+-])(\d\d)(?::?(\d\d))?)?$").unwrap()
});
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+S)?)?|(\d+W))$").unwrap()
});
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").unwrap()
});
static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[-0-9a-z]{0,61}[0-9a-z])?)*\.?$").unwrap()
});
static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:urn:uuid:)?[0-9a-f]{8}-(?:[0-9a-f]{4}-){3}[0-9a-f]{12}$").unwrap()
});
static JSON_POINTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:/(?:[^~/]|~0|~1)*)*$").unwrap());
static RELATIVE_JSON_POINTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:0|[1-9][0-9]*)(?:#|(?:/(?:[^~/]|~0|~1)*)*)$").unwrap());
static BYTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static YEAR_MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").unwrap());

/// Every format the registry knows out of the box, keyed by name.
pub fn builtin_formats() -> IndexMap<String, Arc<FormatDef>> {
    let defs = [
        FormatDef::string("date", is_date).with_compare(compare_date),
        FormatDef::string("time", is_time).with_compare(compare_time),
        FormatDef::string("date-time", is_date_time).with_compare(compare_date_time),
        FormatDef::string("duration", is_duration),
        FormatDef::string("uri", is_uri),
        FormatDef::string("uri-reference", is_uri_reference),
        FormatDef::string("url", is_url),
        FormatDef::string("email", |s| EMAIL.is_match(s)),
        FormatDef::string("hostname", |s| s.len() <= 253 && HOSTNAME.is_match(s)),
        FormatDef::string("ipv4", |s| s.parse::<Ipv4Addr>().is_ok()),
        FormatDef::string("ipv6", |s| s.parse::<Ipv6Addr>().is_ok()),
        FormatDef::string("regex", |s| Regex::new(s).is_ok()),
        FormatDef::string("uuid", |s| UUID.is_match(s)),
        FormatDef::string("json-pointer", |s| JSON_POINTER.is_match(s)),
        FormatDef::string("relative-json-pointer", |s| RELATIVE_JSON_POINTER.is_match(s)),
        FormatDef::string("byte", |s| BYTE.is_match(s)),
        FormatDef::number("int32", |n| n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64),
        FormatDef::number("int64", |n| n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_991.0),
        FormatDef::number("float", |_| true),
        FormatDef::number("double", |_| true),
        FormatDef::string("password", |_| true),
        FormatDef::string("binary", |_| true),
        FormatDef::string("year", |s| YEAR.is_match(s)).with_compare(compare_year),
        FormatDef::string("year-month", |s| YEAR_MONTH.is_match(s)).with_compare(compare_year_month),
    ];
    defs.into_iter().map(|d| (d.name.clone(), Arc::new(d))).collect()
}

/// Fixed-width formats order lexically once both sides are valid.
fn compare_year(a: &str, b: &str) -> Option<Ordering> {
    (YEAR.is_match(a) && YEAR.is_match(b)).then(|| a.cmp(b))
}

fn compare_year_month(a: &str, b: &str) -> Option<Ordering> {
    (YEAR_MONTH.is_match(a) && YEAR_MONTH.is_match(b)).then(|| a.cmp(b))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let caps = DATE.captures(s)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)
}

fn is_date(s: &str) -> bool {
    parse_date(s).is_some()
}

fn compare_date(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_date(a)?.cmp(&parse_date(b)?))
}

/// Seconds since midnight UTC (the offset, when present, is applied).
fn parse_time(s: &str) -> Option<f64> {
    let caps = TIME.captures(s)?;
    let hr: f64 = caps.get(1)?.as_str().parse().ok()?;
    let min: f64 = caps.get(2)?.as_str().parse().ok()?;
    let sec: f64 = caps.get(3)?.as_str().parse().ok()?;
    if hr > 23.0 || min > 59.0 || sec >= 61.0 {
        return None;
    }
    let (tz_hr, tz_min) = match (caps.get(6), caps.get(7)) {
        (Some(h), m) => (h.as_str().parse::<f64>().ok()?, m.map_or(Some(0.0), |m| m.as_str().parse().ok())?),
        (None, _) => (0.0, 0.0),
    };
    if tz_hr > 23.0 || tz_min > 59.0 {
        return None;
    }
    let sign = if caps.get(5).is_some_and(|m| m.as_str() == "-") { -1.0 } else { 1.0 };
    let offset = sign * (tz_hr * 3600.0 + tz_min * 60.0);
    // leap seconds only at the last minute of the UTC day
    let utc_min = (hr * 60.0 + min - offset / 60.0).rem_euclid(1440.0);
    if sec >= 60.0 && utc_min != 1439.0 {
        return None;
    }
    Some(hr * 3600.0 + min * 60.0 + sec - offset)
}

fn is_time(s: &str) -> bool {
    parse_time(s).is_some()
}

fn compare_time(a: &str, b: &str) -> Option<Ordering> {
    parse_time(a)?.partial_cmp(&parse_time(b)?)
}

fn split_date_time(s: &str) -> Option<(&str, &str)> {
    let idx = s.find(|c: char| c == 'T' || c == 't' || c.is_whitespace())?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn is_date_time(s: &str) -> bool {
    split_date_time(s).is_some_and(|(d, t)| is_date(d) && is_time(t))
}

fn compare_date_time(a: &str, b: &str) -> Option<Ordering> {
    if !is_date_time(a) || !is_date_time(b) {
        return None;
    }
    let normalize = |s: &str| s.replacen([' ', 't'], "T", 1).replace('z', "Z");
    match (DateTime::parse_from_rfc3339(&normalize(a)), DateTime::parse_from_rfc3339(&normalize(b))) {
        (Ok(x), Ok(y)) => Some(x.cmp(&y)),
        _ => {
            let (da, ta) = split_date_time(a)?;
            let (db, tb) = split_date_time(b)?;
            match compare_date(da, db)? {
                Ordering::Equal => compare_time(ta, tb),
                other => Some(other),
            }
        }
    }
}

fn is_duration(s: &str) -> bool {
    if s == "P" || s.ends_with('T') {
        return false;
    }
    DURATION.is_match(s)
}

fn is_uri(s: &str) -> bool {
    !s.contains(char::is_whitespace) && url::Url::parse(s).is_ok()
}

fn is_uri_reference(s: &str) -> bool {
    static BASE: Lazy<url::Url> = Lazy::new(|| url::Url::parse("http://base.invalid/").unwrap());
    !s.contains(char::is_whitespace) && !s.contains('\\') && BASE.join(s).is_ok()
}

fn is_url(s: &str) -> bool {
    !s.contains(char::is_whitespace)
        && url::Url::parse(s).is_ok_and(|u| matches!(u.scheme(), "http" | "https" | "ftp") && u.has_host())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, s: &str) -> bool {
        let formats = builtin_formats();
        formats[name].test(&Val::str(s)).unwrap()
    }

    #[test]
    fn calendar_formats_validate_ranges() {
        assert!(check("date", "2024-02-29"));
        assert!(!check("date", "2023-02-29"));
        assert!(!check("date", "2023-2-01"));
        assert!(check("time", "23:59:60Z"));
        assert!(!check("time", "12:59:60Z"));
        assert!(check("time", "08:30:06+01:00"));
        assert!(check("date-time", "1963-06-19T08:30:06.283185Z"));
        assert!(!check("date-time", "1963-06-19"));
        assert!(check("duration", "P1DT2H"));
        assert!(!check("duration", "PT"));
    }

    #[test]
    fn custom_year_formats() {
        assert!(check("year", "2021"));
        assert!(!check("year", "21"));
        assert!(check("year-month", "2021-12"));
        assert!(!check("year-month", "2021-13"));
    }

    #[test]
    fn non_strings_pass_string_formats() {
        let formats = builtin_formats();
        assert!(formats["email"].test(&Val::Num(5.0)).unwrap());
        assert!(!formats["int32"].test(&Val::Num(3_000_000_000.0)).unwrap());
    }

    #[test]
    fn comparators_order_valid_values_only() {
        let formats = builtin_formats();
        let date = &formats["date"];
        assert_eq!(date.compare(&Val::str("2020-01-02"), &Val::str("2020-01-10")), Some(Ordering::Less));
        assert_eq!(date.compare(&Val::str("garbage"), &Val::str("2020-01-10")), None);
        let ym = &formats["year-month"];
        assert_eq!(ym.compare(&Val::str("2021-12"), &Val::str("2021-02")), Some(Ordering::Greater));
        let dt = &formats["date-time"];
        assert_eq!(
            dt.compare(&Val::str("2020-01-01T10:00:00+02:00"), &Val::str("2020-01-01T09:00:00Z")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn user_formats() {
        let f = FormatDef::regex("code", "^[A-Z]{3}$").unwrap();
        assert!(f.test(&Val::str("ABC")).unwrap());
        assert!(!f.test(&Val::str("abc")).unwrap());
        assert!(FormatDef::regex("bad", "(").is_err());
        let even = FormatDef::predicate("even", JsonType::Number, |v| Ok(v.as_f64().is_some_and(|n| n % 2.0 == 0.0)));
        assert!(even.test(&Val::Num(4.0)).unwrap());
        assert!(!even.test(&Val::Num(3.0)).unwrap());
    }
}
