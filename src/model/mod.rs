pub mod config;
pub mod training_history;

pub use config::{DeviceType, LabelSettings, ModelSettings, PipelineConfig, TrainingSettings};
pub use training_history::{EpochRecord, TrainingHistory};
