//! Identity capture verification
//!
//! This library provides the core of the capture-verify system: captured
//! frames are persisted as work items, handed to an out-of-band detection
//! worker, and correlated with the worker's result through change
//! notifications, bounded by a timeout.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
