//! Queue plumbing that drives runs forward: resumption messages, per-run
//! locking, run naming and a bounded-concurrency consumer loop.

pub mod config;
pub mod consumer;
pub mod errors;
pub mod lease;
pub mod message;
pub mod queue;
pub mod worker;

pub use config::*;
pub use consumer::*;
pub use errors::*;
pub use lease::*;
pub use message::*;
pub use queue::*;
pub use worker::*;
