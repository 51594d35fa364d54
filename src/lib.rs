//! # hookify-worker
//!
//! Postgres-backed job processor for idea generation requests.
//!
//! Many uncoordinated workers pull `queued` requests from a shared table,
//! claim exactly one at a time with an atomic conditional update, run a
//! configurable pipeline of side effects (claim notification, idea
//! generation + idempotent output persistence) and record a terminal
//! outcome. OpenTelemetry observability throughout.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
pub mod storage;
pub mod telemetry;
