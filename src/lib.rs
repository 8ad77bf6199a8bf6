//! tornet - automate IP address changes using Tor.
//!
//! The rotation loop periodically asks the local Tor service for a new
//! identity, confirms the resulting exit address, and reports it. Shutdown
//! is coordinated by [`lifecycle::LifecycleSupervisor`], which stops Tor
//! exactly once however the loop ends.

pub mod cli;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod probe;
pub mod rotation;
pub mod service;

#[cfg(test)]
mod testing;
