//! I/O adapters: configuration, container runtime, HTTP and the report sink.

pub mod config;
pub mod context;
pub mod docker;
pub mod http;
pub mod report;
pub mod runtime;
