//! HTTP surface for the mutation guard.

pub mod server;
