//! Acceptance tests for the heartbeat watchdog.
//!
//! Timing assertions allow scheduling slack on top of the nominal bounds;
//! unloaded machines land well inside it.

mod common;
mod watchdog_test;
