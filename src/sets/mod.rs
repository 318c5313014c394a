//! Study set entity shapes shared by the gateway, hydration and sessions

pub mod models;

pub use models::*;
