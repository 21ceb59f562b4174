//! Exchange Endpoint server

pub mod http;

pub use http::{serve, serve_tls, split_prefix, AccessMode, AppState};
