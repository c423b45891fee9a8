//! Serde helpers for lenient deserialization of server frames.
//!
//! When the `tracing` feature is enabled, this module also logs warnings for any
//! unknown fields encountered during deserialization, helping detect protocol additions.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that deserializes booleans or boolean strings (`"true"`, `"false"`) as `bool`.
///
/// The welcome frame reports quality of service as a string.
pub struct BoolFromAny;

impl<'de> serde_with::DeserializeAs<'de, bool> for BoolFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<bool, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct BoolOrStringVisitor;

        impl Visitor<'_> for BoolOrStringVisitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("boolean or boolean string")
            }

            fn visit_bool<E>(self, v: bool) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if v.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(BoolOrStringVisitor)
    }
}

/// Deserialize JSON with unknown field warnings.
///
/// Unknown fields never cause a failure; the protocol may grow fields the client
/// does not know about. With `tracing` enabled they are logged at warn level and
/// failures are logged with the path of the offending field.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(
    value: Value,
) -> std::result::Result<T, serde_json::Error> {
    use std::any::type_name;

    tracing::trace!(
        type_name = %type_name::<T>(),
        json = %value,
        "deserializing frame"
    );

    // Clone the value so we can look up unknown field values later
    let original = value.clone();

    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        // Re-deserialize with serde_path_to_error to get the error path
        let json_str = original.to_string();
        let jd = &mut serde_json::Deserializer::from_str(&json_str);
        let path_result: Result<T, _> = serde_path_to_error::deserialize(jd);
        if let Err(path_err) = path_result {
            let path = path_err.path().to_string();
            let value_display = format_value(lookup_value(&original, &path));

            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path,
                value = %value_display,
                error = %path_err.inner(),
                "frame deserialization failed"
            );
        }
    })?;

    if !unknown_paths.is_empty() {
        let type_name = type_name::<T>();
        for path in unknown_paths {
            let value_display = format_value(lookup_value(&original, &path));

            tracing::warn!(
                type_name = %type_name,
                field = %path,
                value = %value_display,
                "unknown field in frame"
            );
        }
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(
    value: Value,
) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

/// Look up a value in a frame by a dotted path as reported by `serde_ignored`
/// or `serde_path_to_error` (`body.extra`, `?` segments are skipped).
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in path.split('.') {
        if segment.is_empty() || segment == "?" {
            continue;
        }

        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(arr) => current = arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }

    Some(current)
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<unable to retrieve>".to_owned(),
    }
}
