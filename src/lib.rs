pub mod agent;
pub mod config;
pub mod directory;
pub mod model;
pub mod platform;
