pub mod agent;
pub mod bitrate;
pub mod collector;
pub mod config;
pub mod node;
