//! TS70 station explorer: filters production-test records by time range, station
//! status, serial number and order name, and serves them as JSON.

pub mod catalog;
pub mod config;
pub mod db;
pub mod filter;
pub mod query_compiler;
pub mod range;
pub mod server;
