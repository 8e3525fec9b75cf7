//! # Aqua Ingest Library
//!
//! Ingest water-quality telemetry frames from a serial LoRa receiver and
//! serve the stored history over HTTP.
//!
//! This library provides the serial ingestion loop, the record store it
//! writes to, and the read-only query API.

pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod record;
pub mod serial;
pub mod store;
