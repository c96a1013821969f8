//! authgate - request authentication and abuse control
//!
//! This crate provides session tokens with revocation, distributed rate
//! limiting over a shared counter store, and an ordered request pipeline
//! (CORS, flow limiting, token resolution, request logging) for axum.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod otel;
pub mod server;
pub mod store;
