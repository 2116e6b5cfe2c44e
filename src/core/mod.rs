//! Core modules for Hivelog's coordination kernel.
//!
//! Storage, the event log and its projections, and the shared primitives the
//! plugins build on all live here.

pub mod broker;
pub mod config;
pub mod db;
pub mod decay;
pub mod error;
pub mod event_log;
pub mod events;
pub mod models;
pub mod projections;
pub mod schemas;
pub mod semantic;
pub mod store;
pub mod time;
