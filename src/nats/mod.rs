//! NATS connectivity

pub mod client;

pub use client::connect;
