#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod graph;
pub mod listener;
mod origin;
pub mod pipeline;
mod secret;
pub mod stack;

pub use self::{
    origin::OriginVerify,
    secret::{SecretError, SharedSecret},
};
pub use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};

/// The header the edge uses to prove a request came through the distribution.
pub const DEFAULT_ORIGIN_HEADER: &str = "X-From-CloudFront";

pub const DEFAULT_SECRET_LENGTH: usize = 8;
