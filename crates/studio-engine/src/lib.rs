pub mod artifacts;
pub mod assemble;
pub mod config;
pub mod error;
pub mod fetch;
pub mod generate;
mod http;
pub mod imaging;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod search;
pub mod select;

#[cfg(test)]
mod testing;

pub use config::{preflight_output_dir, StudioConfig};
pub use error::{ErrorClass, StudioError};
pub use pipeline::{JobOutcome, Pipeline};
