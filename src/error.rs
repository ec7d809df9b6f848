//! パイプラインで発生する既知のエラー分類

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("入力ディレクトリが見つかりません: {0}")]
    MissingDirectory(PathBuf),

    #[error("{dir} に '{extension}' の画像が1枚もありません")]
    EmptyDataset { dir: PathBuf, extension: String },

    #[error("画像数 ({images}) とラベル数 ({labels}) が一致しません")]
    LengthMismatch { images: usize, labels: usize },

    #[error(
        "画像サイズが不揃いです: {path} は {actual:?} (期待: {expected:?})"
    )]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("入力サイズが小さすぎます: {height}x{width} (最小10x10が必要)")]
    ImageTooSmall { height: usize, width: usize },

    #[error("{0}データが0件になります（データ数を増やすか test_fraction を調整してください）")]
    EmptyPartition(&'static str),

    #[error("設定値が不正です: {0}")]
    InvalidConfig(String),

    #[error("ラベルCSVに {0} のラベルがありません")]
    MissingLabel(String),
}
