//! Decor Marketplace core
//!
//! Booking lifecycle, quotations and contracts, wallet ledger, commission
//! settlement and the scheduled expiry sweeps of a home-decoration services
//! marketplace. Transport layers sit outside this crate and call into the
//! services exposed from [`services`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod metrics;
pub mod notifications;
pub mod services;

pub use errors::{ErrorCode, ServiceError};
