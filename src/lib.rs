//! Pompey News - a Portsmouth FC news aggregator
//!
//! Pulls club coverage from a configured set of RSS/Atom feeds, merges and
//! de-duplicates it, and serves it alongside fixtures, results, the league
//! table and an optional model-written digest of the day's headlines.

pub mod auth;
pub mod clock;
pub mod config;
pub mod feeds;
pub mod fixtures;
pub mod rate_limit;
pub mod routes;
pub mod service;
pub mod summary;
pub mod view;
