pub mod ml_model;
pub mod training;

pub use ml_model::{LayerSummary, ModelSummary, RecordingRegressor, RegressorConfig};
pub use training::{
    evaluate, read_loss_history, split_indices, train_model, ImageBatch, ImageBatcher, ImageDataset, ImageItem,
    TrainedModel,
};
