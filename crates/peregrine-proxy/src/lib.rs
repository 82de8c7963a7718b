//! `peregrine-proxy` — egress identity pool with per-identity rate-limit
//! cooldowns and least-recently-used rotation.
//!
//! Shared by every subscriber workflow across release events. Selection
//! and the `last_used` mark happen under one lock so two workflows can
//! never rotate onto the same identity in the same instant.

pub mod pool;

pub use pool::ProxyPool;
