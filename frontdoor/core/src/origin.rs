use crate::{
    listener::{Condition, HeaderMatch, Pattern},
    SharedSecret,
};
use http::{HeaderMap, HeaderName};

/// The header/secret pair that proves a request passed through the edge.
///
/// The edge stamps it onto every forwarded request and the origin listener
/// matches on it, so both sides must be built from the same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginVerify {
    name: HeaderName,
    secret: SharedSecret,
}

// === impl OriginVerify ===

impl OriginVerify {
    pub fn new(name: HeaderName, secret: SharedSecret) -> Self {
        Self { name, secret }
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.name
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    /// Sets the verification header, replacing any value the client sent.
    pub fn stamp(&self, headers: &mut HeaderMap) {
        headers.insert(self.name.clone(), self.secret.header_value());
    }

    /// Returns true if `headers` carry exactly the expected secret.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        self.header_match().matches(headers)
    }

    /// The listener condition that admits stamped requests.
    pub fn condition(&self) -> Condition {
        Condition::HttpHeader(self.header_match())
    }

    fn header_match(&self) -> HeaderMatch {
        HeaderMatch {
            name: self.name.clone(),
            values: vec![Pattern::Exact(self.secret.as_str().to_string())],
        }
    }
}
