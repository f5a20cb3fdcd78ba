use super::ListenerError;
use http::{HeaderMap, HeaderName, Method, Uri};
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    HttpHeader(HeaderMatch),
    PathPattern(Vec<Pattern>),
    HttpRequestMethod(Vec<Method>),
}

/// Matches when any value of the named header matches any of `values`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: HeaderName,
    pub values: Vec<Pattern>,
}

/// A literal value, or a wildcard pattern where `*` matches any run of
/// characters and `?` matches exactly one. Comparisons are case-sensitive.
#[derive(Clone, Debug)]
pub enum Pattern {
    Exact(String),
    Wildcard(Regex),
}

// === impl Condition ===

impl Condition {
    pub fn matches(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        match self {
            Self::HttpHeader(m) => m.matches(headers),
            Self::PathPattern(patterns) => {
                let path = uri.path().as_bytes();
                patterns.iter().any(|p| p.matches(path))
            }
            Self::HttpRequestMethod(methods) => methods.contains(method),
        }
    }
}

// === impl HeaderMatch ===

impl HeaderMatch {
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(&self.name)
            .iter()
            .any(|v| self.values.iter().any(|p| p.matches(v.as_bytes())))
    }
}

// === impl Pattern ===

impl Pattern {
    /// Parses a value, treating it as a wildcard pattern only if it contains
    /// `*` or `?`.
    pub fn parse(s: &str) -> Result<Self, ListenerError> {
        if !s.contains(['*', '?']) {
            return Ok(Self::Exact(s.to_string()));
        }

        let mut re = String::from("(?s)^");
        for c in s.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push('$');

        Regex::new(&re)
            .map(Self::Wildcard)
            .map_err(|source| ListenerError::InvalidPattern {
                pattern: s.to_string(),
                source,
            })
    }

    pub fn matches(&self, value: &[u8]) -> bool {
        match self {
            Self::Exact(s) => s.as_bytes() == value,
            Self::Wildcard(re) => std::str::from_utf8(value)
                .map(|v| re.is_match(v))
                .unwrap_or(false),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(l0), Self::Exact(r0)) => l0 == r0,
            (Self::Wildcard(l0), Self::Wildcard(r0)) => l0.as_str() == r0.as_str(),
            _ => false,
        }
    }
}

impl Eq for Pattern {}
