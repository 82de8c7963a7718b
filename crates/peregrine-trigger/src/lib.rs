//! `peregrine-trigger` — computes the instant a venue's inventory opens
//! and drives a timer loop that fires exactly then.
//!
//! # Semantics
//!
//! | Concern          | Behaviour                                            |
//! |------------------|------------------------------------------------------|
//! | Release instant  | Venue-local release time normalized to UTC           |
//! | Recurrence       | Daily; a passed instant rolls to the next occurrence |
//! | Drift            | Wait recomputed from the absolute target each tick   |
//! | DST gap          | Nonexistent local times skip to the next valid day   |
//! | Cancellation     | Shutdown never fires the callback                    |
//!
//! Competing systems race on the same instant, so the waiter targets
//! sub-second precision: it sleeps in bounded chunks and rechecks the
//! wall clock until the target has actually arrived.

pub mod error;
pub mod release;
pub mod timer;

pub use error::{Result, TriggerError};
pub use release::{forward_window, next_release_instant, target_date};
pub use timer::{ReleaseFire, TriggerLoop};
