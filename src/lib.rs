//! Scheduling & capacity engine for a tutoring marketplace: weekly
//! availability, bookable slots, conflict detection and class capacity.

pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod time;
