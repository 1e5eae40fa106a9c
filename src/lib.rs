//! Catalog job tracking
//!
//! Client-side lifecycle management for the catalog scraping pipeline:
//! submit parse jobs, poll them to completion, fetch their results, cancel
//! them, and keep a live view of the tasks running on the worker fleet.

pub mod config;
pub mod models;
pub mod services;
pub mod tracker;

pub use services::registry::{JobEvent, JobHandle};
pub use tracker::{JobTracker, TrackerSettings};
