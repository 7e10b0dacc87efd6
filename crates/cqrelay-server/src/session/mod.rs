//! Session relay: one client connection paired with one upstream connection.

pub mod relay;

pub use relay::Session;
