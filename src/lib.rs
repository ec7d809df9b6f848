#![recursion_limit = "256"]

pub mod csv_loader;
pub mod error;
pub mod image_loader;
pub mod ml;
pub mod model;
pub mod pipeline;
pub mod types;
pub mod visualizer;

pub use error::PipelineError;
pub use model::PipelineConfig;
pub use pipeline::{run, RunReport};
