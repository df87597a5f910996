//! Record body model and the input-value normalizer.
//!
//! A record body is an opaque `serde_json::Value` with one recognized shape:
//! a `publishing` object carrying `private: bool` and an optional
//! `until: string` (RFC3339). Everything else is preserved verbatim.

use serde_json::{Map, Value};
use tracing::debug;

use crate::clock::parse_instant_millis;

/// Key under which the publishing policy lives in a record body.
pub const PUBLISHING_FIELD: &str = "publishing";
/// Key under which the privacy flag lives, inside `publishing`.
pub const PRIVATE_FIELD: &str = "private";
/// Key under which the deadline instant lives, inside `publishing`.
pub const UNTIL_FIELD: &str = "until";

/// The publishing policy read off a normalized record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy<'a> {
    /// Whether the record is currently private.
    pub private: bool,
    /// The raw `until` string, if present. Not yet parsed/validated.
    pub until: Option<&'a str>,
}

impl Policy<'_> {
    /// Whether a record under this policy should currently be suppressed.
    ///
    /// Not simply `self.private`: a private record with an `until` that has
    /// already elapsed by `now_millis` is no longer effectively private. The
    /// Delayed Publisher's republish only re-enters the input stream; it is
    /// this re-evaluation against the current instant, not a mutation of the
    /// stored `private` flag, that exposes the value once its deadline has
    /// passed. A missing or unparseable `until` never expires.
    pub fn is_effectively_private(&self, now_millis: i64) -> bool {
        if !self.private {
            return false;
        }
        match self.until.and_then(parse_instant_millis) {
            Some(deadline) => deadline > now_millis,
            None => true,
        }
    }
}

/// Read the publishing policy off a (not necessarily normalized) body.
///
/// A null or non-object body, or a `publishing` field that isn't an object,
/// reads as "not private, no until" — the same policy a freshly-normalized
/// body with no `publishing` field would have.
pub fn read_policy(value: &Value) -> Policy<'_> {
    let Some(publishing) = value.as_object().and_then(|o| o.get(PUBLISHING_FIELD)) else {
        return Policy::default();
    };
    let Some(publishing) = publishing.as_object() else {
        return Policy::default();
    };

    let private = publishing
        .get(PRIVATE_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let until = publishing.get(UNTIL_FIELD).and_then(Value::as_str);

    Policy { private, until }
}

/// Normalize a record body: ensures `publishing.private` exists and is a
/// boolean, leaving every other field untouched.
///
/// A null or non-object body passes through unchanged — downstream
/// components treat it as "no publishing policy" rather than failing.
pub fn normalize(value: Value) -> Value {
    let Value::Object(mut obj) = value else {
        debug!("malformed record body: not a JSON object, passing through unchanged");
        return value;
    };

    match obj.get_mut(PUBLISHING_FIELD) {
        Some(Value::Object(publishing)) => {
            if !matches!(publishing.get(PRIVATE_FIELD), Some(Value::Bool(_))) {
                publishing.insert(PRIVATE_FIELD.to_string(), Value::Bool(false));
            }
        }
        // Absent, or present but not an object: replace with a fresh policy.
        // A malformed `publishing` field is treated the same as an absent
        // one rather than propagated as an error.
        _ => {
            let mut publishing = Map::new();
            publishing.insert(PRIVATE_FIELD.to_string(), Value::Bool(false));
            obj.insert(PUBLISHING_FIELD.to_string(), Value::Object(publishing));
        }
    }

    Value::Object(obj)
}
