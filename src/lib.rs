//! Continuous DNS resolution monitor.
//!
//! [`engine::TestEngine`] probes every configured domain against every
//! configured server once per round, keeps a bounded window of results with
//! rolling statistics, appends each round to a rotating JSONL log and fans it
//! out to live subscribers through [`hub::BroadcastHub`].

pub mod buffer;
pub mod config;
pub mod dns;
pub mod domains;
pub mod engine;
pub mod error;
pub mod hub;
pub mod logger;
pub mod output;
pub mod resolver;
pub mod scheduler;
pub mod stats;
pub mod transport;
