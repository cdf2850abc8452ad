// RenderFlow - cloud render job broker
//
// This crate provides the broker and worker pipeline for rendering
// user-supplied compositions: tiered priority queues with per-owner
// concurrency caps, an authoritative job state store, a six-stage render
// pipeline with classified errors and per-stage retry policy, a throttled
// progress plane fanned out over SSE, and atomic credit accounting.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
