pub mod config;
pub mod constants;
pub mod core;
pub mod jobs;
pub mod native;
