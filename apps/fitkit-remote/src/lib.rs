//! Remote FITkit builds and simulations, presented as a local terminal.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod session;
pub mod telemetry;
pub mod terminal;
