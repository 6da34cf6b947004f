pub mod clock;
pub mod config;
pub mod debug;
pub mod detector;
pub mod driver;
pub mod engine;
pub mod error;
pub mod layout;
pub mod logger;
pub mod matcher;
pub mod orchestrator;
pub mod overlay;
pub mod platform;
pub mod settings;
pub mod tasks;
pub mod tracker;
pub mod types;
