pub mod cli;
pub mod config;
pub mod error;
pub mod generator;
pub mod probe;
pub mod reporter;
pub mod sip;
pub mod stats;
pub mod template;
pub mod transport;

#[cfg(test)]
pub mod testutil;
