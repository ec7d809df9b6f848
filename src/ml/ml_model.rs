//! 機械学習モデルの共通定義
//!
//! 画像からスカラー値を回帰するCNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::{MseLoss, Reduction},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
    train::RegressionOutput,
};
use log::debug;

use crate::error::PipelineError;

/// モデル設定
#[derive(Config, Debug)]
pub struct RegressorConfig {
    /// 入力画像の高さ
    pub input_height: usize,
    /// 入力画像の幅
    pub input_width: usize,
    /// Conv1のフィルタ数
    pub conv1_filters: usize,
    /// 入力チャネル数
    #[config(default = 3)]
    pub input_channels: usize,
    /// Conv2のフィルタ数
    #[config(default = 64)]
    pub conv2_filters: usize,
    /// 全結合層の中間ユニット数
    #[config(default = 64)]
    pub hidden_units: usize,
}

/// レイヤーごとの出力形状とパラメータ数
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: &'static str,
    pub output_shape: Vec<usize>,
    pub params: usize,
}

/// モデル構成の要約
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }

    /// Flatten後の特徴次元
    pub fn feature_dim(&self) -> usize {
        self.layers
            .iter()
            .find(|l| l.name == "flatten")
            .map(|l| l.output_shape[0])
            .unwrap_or(0)
    }
}

impl std::fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Model: \"recording_regressor\"")?;
        writeln!(f, "{:<16}{:<24}{:>12}", "Layer", "Output Shape", "Param #")?;
        writeln!(f, "{}", "=".repeat(52))?;
        for layer in &self.layers {
            let dims: Vec<String> = layer.output_shape.iter().map(|d| d.to_string()).collect();
            let shape = format!("(None, {})", dims.join(", "));
            writeln!(f, "{:<16}{:<24}{:>12}", layer.name, shape, layer.params)?;
        }
        writeln!(f, "{}", "=".repeat(52))?;
        write!(f, "Total params: {}", self.total_params())
    }
}

impl RegressorConfig {
    /// 各レイヤーの出力形状を計算
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2, stride 2): size -> size / 2 (切り捨て)
    pub fn summary(&self) -> Result<ModelSummary, PipelineError> {
        let (h, w) = (self.input_height, self.input_width);

        let conv1 = (h.saturating_sub(2), w.saturating_sub(2));
        let pool1 = (conv1.0 / 2, conv1.1 / 2);
        let conv2 = (pool1.0.saturating_sub(2), pool1.1.saturating_sub(2));
        let pool2 = (conv2.0 / 2, conv2.1 / 2);

        if pool2.0 == 0 || pool2.1 == 0 {
            return Err(PipelineError::ImageTooSmall {
                height: h,
                width: w,
            });
        }

        let c1 = self.conv1_filters;
        let c2 = self.conv2_filters;
        let d = c2 * pool2.0 * pool2.1;

        let layers = vec![
            LayerSummary {
                name: "conv2d",
                output_shape: vec![conv1.0, conv1.1, c1],
                params: (9 * self.input_channels + 1) * c1,
            },
            LayerSummary {
                name: "max_pooling2d",
                output_shape: vec![pool1.0, pool1.1, c1],
                params: 0,
            },
            LayerSummary {
                name: "conv2d_1",
                output_shape: vec![conv2.0, conv2.1, c2],
                params: (9 * c1 + 1) * c2,
            },
            LayerSummary {
                name: "max_pooling2d_1",
                output_shape: vec![pool2.0, pool2.1, c2],
                params: 0,
            },
            LayerSummary {
                name: "flatten",
                output_shape: vec![d],
                params: 0,
            },
            LayerSummary {
                name: "dense",
                output_shape: vec![self.hidden_units],
                params: (d + 1) * self.hidden_units,
            },
            LayerSummary {
                name: "dense_1",
                output_shape: vec![1],
                params: self.hidden_units + 1,
            },
        ];

        Ok(ModelSummary { layers })
    }

    /// モデルを初期化
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<RecordingRegressor<B>, PipelineError> {
        let d = self.summary()?.feature_dim();

        debug!("[Model] 入力サイズ: {}x{}", self.input_height, self.input_width);
        debug!("[Model] Flatten後の特徴次元 d: {}", d);

        Ok(RecordingRegressor {
            conv1: Conv2dConfig::new([self.input_channels, self.conv1_filters], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            conv2: Conv2dConfig::new([self.conv1_filters, self.conv2_filters], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),

            fc1: LinearConfig::new(d, self.hidden_units).init(device),
            fc2: LinearConfig::new(self.hidden_units, 1).init(device),

            activation: Relu::new(),
        })
    }
}

/// スカラー回帰用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (no padding, stride 1) + ReLU + MaxPool 2x2} x 2層
/// - Flatten
/// - FC: d -> hidden + ReLU
/// - FC: hidden -> 1
#[derive(Module, Debug)]
pub struct RecordingRegressor<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,

    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> RecordingRegressor<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, height, width]
    ///
    /// # 戻り値
    /// - 予測値 [batch_size, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// 順伝播と平均二乗誤差の計算
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, height, width]
    /// - `targets`: ターゲット値 [batch_size, 1]
    pub fn forward_regression(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2>,
    ) -> RegressionOutput<B> {
        let output = self.forward(images);
        let loss = MseLoss::new().forward(output.clone(), targets.clone(), Reduction::Mean);

        RegressionOutput::new(loss, output, targets)
    }
}
