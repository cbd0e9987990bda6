pub mod actions;
pub mod backoff;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod matching;
pub mod ratelimit;
pub mod resolver;
pub mod store;
pub mod transport;
pub mod types;
