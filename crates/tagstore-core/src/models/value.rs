//! Tag values
//!
//! `TagValue` is a closed union. Every conversion, comparison and storage
//! encoding matches on it exhaustively, so adding a variant forces every
//! site to handle it.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::models::Identity;

/// Scheme of locators stored relative to the attached storage directory
pub const MANAGED_SCHEME: &str = "managed";

/// Value type of a tag class (and of every tag of that class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    None,
    Text,
    Number,
    Locator,
    NodeReference,
}

impl ValueType {
    pub const ALL: [ValueType; 5] = [
        ValueType::None,
        ValueType::Text,
        ValueType::Number,
        ValueType::Locator,
        ValueType::NodeReference,
    ];

    /// Code stored in the `value_type` columns
    pub fn code(self) -> i64 {
        match self {
            ValueType::None => 0,
            ValueType::Text => 1,
            ValueType::Number => 2,
            ValueType::Locator => 3,
            ValueType::NodeReference => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "none",
            ValueType::Text => "text",
            ValueType::Number => "number",
            ValueType::Locator => "locator",
            ValueType::NodeReference => "node_reference",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ValueType::None),
            "text" | "string" => Ok(ValueType::Text),
            "number" | "int" | "real" => Ok(ValueType::Number),
            "locator" | "url" => Ok(ValueType::Locator),
            "node_reference" | "node" | "ref" => Ok(ValueType::NodeReference),
            other => Err(Error::invalid(format!("unknown value type '{}'", other))),
        }
    }
}

/// Integer-or-real number
///
/// Compares numerically and exactly across the two representations, the
/// same way SQLite compares INTEGER and REAL storage classes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Real(r) => r,
        }
    }

    /// Parse an integer or a finite real
    pub fn parse(s: &str) -> Option<Number> {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Some(Number::Int(i));
        }
        s.parse::<f64>()
            .ok()
            .filter(|r| r.is_finite())
            .map(Number::Real)
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (*self, *other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (Number::Real(a), Number::Real(b)) => a.partial_cmp(&b),
            (Number::Int(a), Number::Real(b)) => compare_int_real(a, b),
            (Number::Real(a), Number::Int(b)) => compare_int_real(b, a).map(Ordering::reverse),
        }
    }
}

/// Exact integer/real comparison; no rounding of large integers
fn compare_int_real(i: i64, r: f64) -> Option<Ordering> {
    // 2^63, the first real above every i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if r.is_nan() {
        return None;
    }
    if r >= LIMIT {
        return Some(Ordering::Less);
    }
    if r < -LIMIT {
        return Some(Ordering::Greater);
    }
    let floor = r.floor();
    match i.cmp(&(floor as i64)) {
        Ordering::Equal if r > floor => Some(Ordering::Less),
        ordering => Some(ordering),
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Real(r) => write!(f, "{}", r),
        }
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Number::Int(i)
    }
}

impl From<i32> for Number {
    fn from(i: i32) -> Self {
        Number::Int(i64::from(i))
    }
}

impl From<f64> for Number {
    fn from(r: f64) -> Self {
        Number::Real(r)
    }
}

/// Resource locator
///
/// Three forms are accepted:
/// - `managed:<relative path>`: a file inside the library's attached storage
/// - `file://<absolute path>` or a bare absolute path
/// - any other `scheme:rest` URL
///
/// Holding an unresolvable locator is fine; failure surfaces from `resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Locator(String);

/// Outcome of resolving a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Path(PathBuf),
    Url(String),
}

impl Locator {
    /// Parse and canonicalize a locator
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::invalid("empty locator"));
        }
        if raw.starts_with('/') {
            return Ok(Self(format!("file://{}", raw)));
        }

        let Some((scheme, rest)) = raw.split_once(':') else {
            return Err(Error::invalid(format!("locator '{}' has no scheme", raw)));
        };
        let scheme_ok = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(Error::invalid(format!(
                "locator '{}' has an invalid scheme",
                raw
            )));
        }

        if scheme.eq_ignore_ascii_case(MANAGED_SCHEME) {
            let path = Path::new(rest);
            let relative = !rest.is_empty()
                && path
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !relative {
                return Err(Error::invalid(format!(
                    "managed locator '{}' must be a relative path inside storage",
                    raw
                )));
            }
            return Ok(Self(format!("{}:{}", MANAGED_SCHEME, rest)));
        }

        Ok(Self(format!("{}:{}", scheme.to_ascii_lowercase(), rest)))
    }

    /// A locator for a file inside the attached storage
    pub fn managed(relative: &str) -> Result<Self> {
        Self::parse(&format!("{}:{}", MANAGED_SCHEME, relative))
    }

    /// Canonical string form (also the stored form)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_managed(&self) -> bool {
        self.0.starts_with("managed:")
    }

    /// Resolve against an optional storage root
    pub fn resolve(&self, storage: Option<&Path>) -> Result<Resolved> {
        if let Some(relative) = self.0.strip_prefix("managed:") {
            let root = storage.ok_or_else(|| Error::Resolution {
                locator: self.0.clone(),
                reason: "managed file reference but no storage is attached".to_string(),
            })?;
            return Ok(Resolved::Path(root.join(relative)));
        }
        if let Some(path) = self.0.strip_prefix("file://") {
            if !path.starts_with('/') {
                return Err(Error::Resolution {
                    locator: self.0.clone(),
                    reason: "file locator is not an absolute path".to_string(),
                });
            }
            return Ok(Resolved::Path(PathBuf::from(path)));
        }
        Ok(Resolved::Url(self.0.clone()))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A typed tag value
#[derive(Debug, Clone, Default)]
pub enum TagValue {
    #[default]
    None,
    Text(String),
    Number(Number),
    Locator(Locator),
    NodeReference(Identity),
}

impl TagValue {
    pub fn text(s: impl Into<String>) -> Self {
        TagValue::Text(s.into())
    }

    pub fn number(n: impl Into<Number>) -> Self {
        TagValue::Number(n.into())
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            TagValue::None => ValueType::None,
            TagValue::Text(_) => ValueType::Text,
            TagValue::Number(_) => ValueType::Number,
            TagValue::Locator(_) => ValueType::Locator,
            TagValue::NodeReference(_) => ValueType::NodeReference,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TagValue::None)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            TagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_locator(&self) -> Option<&Locator> {
        match self {
            TagValue::Locator(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_node_reference(&self) -> Option<&Identity> {
        match self {
            TagValue::NodeReference(id) => Some(id),
            _ => None,
        }
    }

    /// Convert to another value type
    ///
    /// Defined for the reachable pairs; everything else yields `None`.
    pub fn convert_to(&self, target: ValueType) -> TagValue {
        match (self, target) {
            (TagValue::None, _) | (_, ValueType::None) => TagValue::None,
            (v, t) if v.value_type() == t => v.clone(),
            (v, ValueType::Text) => TagValue::Text(v.to_string()),
            (TagValue::Text(s), ValueType::Number) => {
                TagValue::Number(Number::parse(s).unwrap_or(Number::Int(0)))
            }
            (TagValue::Text(s), ValueType::Locator) => {
                Locator::parse(s).map_or(TagValue::None, TagValue::Locator)
            }
            (TagValue::NodeReference(id), ValueType::Number) if id.is_flushed() => {
                TagValue::Number(Number::Int(id.id()))
            }
            _ => TagValue::None,
        }
    }
}

/// `None` never equals anything, text compares ASCII-case-insensitively
impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TagValue::Text(a), TagValue::Text(b)) => a.eq_ignore_ascii_case(b),
            (TagValue::Number(a), TagValue::Number(b)) => a == b,
            (TagValue::Locator(a), TagValue::Locator(b)) => a == b,
            (TagValue::NodeReference(a), TagValue::NodeReference(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::None => Ok(()),
            TagValue::Text(s) => f.write_str(s),
            TagValue::Number(n) => write!(f, "{}", n),
            TagValue::Locator(l) => write!(f, "{}", l),
            TagValue::NodeReference(id) if id.is_flushed() => write!(f, "{}", id.id()),
            TagValue::NodeReference(_) => Ok(()),
        }
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            TagValue::None => serializer.serialize_none(),
            TagValue::Text(s) => serializer.serialize_str(s),
            TagValue::Number(n) => n.serialize(serializer),
            TagValue::Locator(l) => l.serialize(serializer),
            TagValue::NodeReference(id) => id.serialize(serializer),
        }
    }
}
