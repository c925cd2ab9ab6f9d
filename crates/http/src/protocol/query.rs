//! Query string decoding.
//!
//! Pairs are separated by `&`, the first `=` of a pair splits key from value, and both sides are
//! decoded with `+` as space and `%XX` as a raw byte. A pair without `=` is a lone key whose value
//! is `None`. Pairs with an empty key or a key containing `?` are dropped.

use std::fmt;

use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameter {
    key: String,
    value: Option<String>,
}

impl QueryParameter {
    /// Builds a parameter from already decoded parts.
    pub fn new(key: impl Into<String>, value: Option<&str>) -> Self {
        Self { key: key.into(), value: value.map(str::to_owned) }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Renders `key = value`, or just `key` when there is no value.
impl fmt::Display for QueryParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} = {}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Decodes `query` into its parameters, in order.
///
/// A pair whose raw key is empty or contains `?` is not a parameter name and is skipped, which
/// is what a stray second `?` in `/path??a=1` produces.
pub fn parse_query(query: &str) -> Vec<QueryParameter> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (pair, None),
            };
            if key.is_empty() || key.contains('?') {
                return None;
            }
            Some(QueryParameter { key: form_decode(key), value: value.map(form_decode) })
        })
        .collect()
}

/// Decodes `+` to space and `%XX` to the byte it names.
///
/// A `%` that is not followed by two hex digits is kept literally. Invalid UTF-8 in the result is
/// replaced rather than rejected.
pub fn form_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
