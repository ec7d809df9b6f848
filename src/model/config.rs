//! パイプライン設定管理モジュール
//!
//! 入出力パスやハイパーパラメータをJSON形式で保存・読み込みします。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::types::ChannelOrder;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// ラベル設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    /// 仮ラベルとプレビュー画像選択の乱数シード（未指定なら毎回異なる）
    pub label_seed: Option<u64>,
    /// 正解ラベルCSV（`file,label`）。指定時は仮ラベルの代わりに使用
    pub labels_csv: Option<PathBuf>,
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// 分割・シャッフル用のランダムシード
    pub seed: u64,
    /// テストデータの割合
    pub test_fraction: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            test_fraction: 0.2,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Conv1のフィルタ数。未指定の場合は入力画像の幅が使われる
    pub conv1_filters: Option<usize>,
    /// Conv2のフィルタ数
    pub conv2_filters: usize,
    /// 全結合層の中間ユニット数
    pub hidden_units: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            conv1_filters: None,
            conv2_filters: 64,
            hidden_units: 64,
        }
    }
}

/// パイプライン設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 入力画像ディレクトリ
    pub data_dir: PathBuf,
    /// 図の出力ディレクトリ
    pub output_dir: PathBuf,
    /// 対象ファイル名の末尾（例: ".png"）
    pub image_extension: String,
    /// デコード後のチャネル順
    pub channel_order: ChannelOrder,
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// 描画した図をビューアで開き、閉じるまで待つ
    pub show_figures: bool,
    pub labels: LabelSettings,
    pub training: TrainingSettings,
    pub model: ModelSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("recording_data/"),
            output_dir: PathBuf::from("output/"),
            image_extension: ".png".to_string(),
            channel_order: ChannelOrder::default(),
            device_type: DeviceType::default(),
            show_figures: false,
            labels: LabelSettings::default(),
            training: TrainingSettings::default(),
            model: ModelSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の範囲チェック
    pub fn validate(&self) -> Result<(), PipelineError> {
        let t = &self.training;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "test_fraction は 0 と 1 の間である必要があります: {}",
                t.test_fraction
            )));
        }
        if t.num_epochs == 0 {
            return Err(PipelineError::InvalidConfig("num_epochs は1以上".into()));
        }
        if t.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch_size は1以上".into()));
        }
        if !(t.learning_rate > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "learning_rate は正の値である必要があります: {}",
                t.learning_rate
            )));
        }
        if self.image_extension.is_empty() {
            return Err(PipelineError::InvalidConfig("image_extension が空です".into()));
        }
        let m = &self.model;
        if m.conv1_filters == Some(0) || m.conv2_filters == 0 || m.hidden_units == 0 {
            return Err(PipelineError::InvalidConfig(
                "フィルタ数・ユニット数は1以上".into(),
            ));
        }
        Ok(())
    }

    /// 出力ファイルのパス
    pub fn example_image_path(&self) -> PathBuf {
        self.output_dir.join("example_image.png")
    }

    pub fn loss_plot_path(&self) -> PathBuf {
        self.output_dir.join("loss_plot.png")
    }

    pub fn loss_history_path(&self) -> PathBuf {
        self.output_dir.join("loss_history.csv")
    }

    /// 設定情報を表示
    pub fn display(&self) {
        info!("=== パイプライン設定 ===");
        info!("入力ディレクトリ: {} (*{})", self.data_dir.display(), self.image_extension);
        info!("出力ディレクトリ: {}", self.output_dir.display());
        info!("チャネル順: {}", self.channel_order);
        info!("計算デバイス: {}", self.device_type);
        info!("エポック数: {}", self.training.num_epochs);
        info!("バッチサイズ: {}", self.training.batch_size);
        info!("学習率: {}", self.training.learning_rate);
        info!("シード: {}", self.training.seed);
        info!("テスト割合: {}", self.training.test_fraction);
        if let Some(ref csv) = self.labels.labels_csv {
            info!("ラベルCSV: {}", csv.display());
        }
    }
}
