pub mod config;
pub mod downstream;
pub mod error;
pub mod logger;
pub mod origin;
pub mod state;
