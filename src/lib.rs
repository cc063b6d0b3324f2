//! Natours - tour catalogue core
//!
//! Document schema and validation for tours, lifecycle hooks around writes
//! and queries, statistics and monthly-plan aggregations, and geospatial
//! radius and distance queries over a SQLite-backed document store.

pub mod config;
pub mod db;
pub mod hooks;
pub mod models;
pub mod services;
