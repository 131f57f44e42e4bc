pub mod builder;
pub mod config;
pub mod error;
pub mod log;
pub mod mirror;
pub mod source;
pub mod store;
