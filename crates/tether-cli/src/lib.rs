//! Terminal client for Tether
//!
//! Reads commands from stdin and renders engine notifications to stdout.

pub mod config;
pub mod input;
pub mod render;

pub use config::Config;
pub use input::{Input, InputError};
pub use render::Renderer;
