#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use frontdoor_core as core;

mod admin;
mod args;
mod edge;
mod forward;
mod metrics;
mod origin;
pub mod pipeline;
pub mod secret;
mod serve;
mod synth;
mod targets;

pub use self::{
    admin::Admin,
    args::Args,
    edge::EdgeGate,
    forward::{client, Body, HttpClient},
    metrics::{AdmissionMetrics, EdgeMetrics, PipelineMetrics},
    origin::OriginFilter,
    serve::{serve, shutdown_signal},
    synth::synth,
    targets::{HealthCheck, TargetGroup, TargetGroups},
};
