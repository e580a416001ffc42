pub mod command;
pub mod config;
pub mod error;
pub mod extract;
pub mod merge;
pub mod pipeline;
pub mod probe;
pub mod render;
pub mod scratch;
pub mod upscale;

pub use error::{Error, Result};
