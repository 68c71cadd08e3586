//! Worker process for keel workflows.
//!
//! Wires the engine to Postgres, an SMTP relay and an HTTP client, then
//! drives continuations and periodic workflows on a schedule.

pub mod config;
pub mod db;
pub mod mail;
pub mod webhook;
