pub mod config;
pub mod constants;
pub mod context;
pub mod geo;
pub mod image;
pub mod pattern;
