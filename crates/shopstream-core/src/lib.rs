//! Core shopstream library (stream decoding, transcript, backend client).

pub mod client;
pub mod config;
pub mod message;
pub mod products;
pub mod selection;
pub mod session;
pub mod sse;
pub mod transcript;
