//! Consensus test suites.
//!
//! `helpers` builds signed chains over deterministic keys; the v1/v2 modules
//! exercise the engines end to end against them.

pub mod helpers;
