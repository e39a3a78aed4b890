//! # wsbwatch
//!
//! Watches a runtime-mutable set of redditors and forwards their fresh
//! submissions and comments in watched subreddits to Telegram chats.
//!
//! Each tracked redditor gets a pair of polling workers (submissions and
//! comments) managed by [`watch::PairManager`]. Telegram bot commands add and
//! remove redditors while the daemon runs; SIGINT/SIGTERM stops and joins
//! every worker before exit.

pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod model;
pub mod reddit;
pub mod registry;
pub mod sink;
pub mod source;
pub mod telegram;
pub mod telemetry;
pub mod watch;
