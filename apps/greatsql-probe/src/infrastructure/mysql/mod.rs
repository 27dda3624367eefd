pub mod client;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod queries;
