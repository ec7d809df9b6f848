//! データセット構築とモデル学習

use anyhow::{Context, Result};
use log::info;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::Dataset,
    },
    optim::AdamConfig,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
    train::{
        metric::LossMetric, LearnerBuilder, LearningStrategy, RegressionOutput, TrainOutput,
        TrainStep, ValidStep,
    },
};

use crate::error::PipelineError;
use crate::ml::RecordingRegressor;
use crate::model::{TrainingHistory, TrainingSettings};
use crate::types::Image;

/// 正規化済みの1サンプル
#[derive(Debug)]
struct Sample {
    pixels: Vec<f32>, // (C, H, W)
    label: f32,
}

/// メモリ上の画像・ラベル組
///
/// 画素データは分割後の学習用・テスト用で共有し、インデックスのみ保持する。
#[derive(Clone)]
pub struct ImageDataset {
    samples: Arc<Vec<Sample>>,
    indices: Vec<usize>,
    shape: (usize, usize, usize),
}

impl ImageDataset {
    /// 画像とラベルから構築（画素は 0-1 に正規化される）
    pub fn new(images: &[Image], labels: &[f32]) -> Result<Self, PipelineError> {
        if images.len() != labels.len() {
            return Err(PipelineError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        let first = images.first().ok_or(PipelineError::EmptyPartition("学習"))?;
        let shape = first.shape();

        let mut samples = Vec::with_capacity(images.len());
        for (image, &label) in images.iter().zip(labels) {
            if image.shape() != shape {
                return Err(PipelineError::ShapeMismatch {
                    path: image.source.clone(),
                    expected: shape,
                    actual: image.shape(),
                });
            }
            samples.push(Sample {
                pixels: image.to_normalized_chw(),
                label,
            });
        }

        let indices = (0..samples.len()).collect();
        Ok(Self {
            samples: Arc::new(samples),
            indices,
            shape,
        })
    }

    /// (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    /// 元の画像列に対するインデックス
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// 学習用とテスト用に分割
    pub fn split(self, test_fraction: f64, seed: u64) -> Result<(Self, Self), PipelineError> {
        let (train_idx, test_idx) = split_indices(self.indices.len(), test_fraction, seed)?;

        let train = Self {
            samples: Arc::clone(&self.samples),
            indices: train_idx.iter().map(|&i| self.indices[i]).collect(),
            shape: self.shape,
        };
        let test = Self {
            samples: self.samples,
            indices: test_idx.iter().map(|&i| self.indices[i]).collect(),
            shape: self.shape,
        };

        Ok((train, test))
    }
}

/// `0..n` をシャッフルして (学習用, テスト用) に分ける
///
/// テスト件数は `ceil(n * test_fraction)`、残りを学習用とする。
/// 同じシードなら常に同じ分割になる。
pub fn split_indices(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), PipelineError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "test_fraction は 0 と 1 の間である必要があります: {}",
            test_fraction
        )));
    }

    // 10 * 0.7 = 7.000000000000001 のような丸め誤差で1件増えないようにする
    let n_test = (n as f64 * test_fraction - 1e-9).ceil() as usize;
    let n_train = n.saturating_sub(n_test);
    if n_test == 0 {
        return Err(PipelineError::EmptyPartition("テスト"));
    }
    if n_train == 0 {
        return Err(PipelineError::EmptyPartition("学習"));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub label: f32,
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.samples.get(*self.indices.get(index)?)?;
        Some(ImageItem {
            pixels: sample.pixels.clone(),
            label: sample.label,
        })
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// バッチャー
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    height: usize,
    width: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, height: usize, width: usize) -> Self {
        Self {
            device,
            height,
            width,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, _device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let mut all_pixels =
            Vec::with_capacity(batch_size * Image::CHANNELS * self.height * self.width);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device).reshape([
            batch_size,
            Image::CHANNELS,
            self.height,
            self.width,
        ]);
        let targets = Tensor::<B, 1>::from_floats(targets_vec.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        ImageBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2>,
}

/// 学習結果
pub struct TrainedModel {
    pub history: TrainingHistory,
    /// 学習後モデルのテストデータに対する平均二乗誤差
    pub test_loss: f64,
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, RegressionOutput<B>> for RecordingRegressor<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<RegressionOutput<B>> {
        let item = self.forward_regression(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<ImageBatch<B>, RegressionOutput<B>> for RecordingRegressor<B> {
    fn step(&self, batch: ImageBatch<B>) -> RegressionOutput<B> {
        self.forward_regression(batch.images, batch.targets)
    }
}

/// モデル学習を実行
///
/// Learnerで `num_epochs` 回学習し、毎エポック終了時にテストデータで検証損失を記録する。
/// 学習データの順序はエポックごとにシードに従ってシャッフルされる。
/// `artifact_dir` にはLearnerのメトリクスログが書かれ、履歴を読み出した後に削除される。
pub fn train_model<B: AutodiffBackend>(
    model: RecordingRegressor<B>,
    dataset_train: &ImageDataset,
    dataset_test: &ImageDataset,
    settings: &TrainingSettings,
    device: &B::Device,
    artifact_dir: &Path,
) -> Result<TrainedModel> {
    if dataset_train.len() == 0 {
        return Err(PipelineError::EmptyPartition("学習").into());
    }
    if dataset_test.len() == 0 {
        return Err(PipelineError::EmptyPartition("テスト").into());
    }

    let (height, width, _) = dataset_train.shape();
    let batcher_train = ImageBatcher::<B>::new(device.clone(), height, width);
    let batcher_valid = ImageBatcher::<B::InnerBackend>::new(device.clone(), height, width);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(0)
        .build(dataset_train.clone());

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(settings.batch_size)
        .num_workers(0)
        .build(dataset_test.clone());

    // 前回実行のログが残っていると履歴が混ざるため作り直す
    if artifact_dir.exists() {
        std::fs::remove_dir_all(artifact_dir)?;
    }
    std::fs::create_dir_all(artifact_dir).with_context(|| {
        format!("アーティファクトディレクトリを作成できません: {}", artifact_dir.display())
    })?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        "[Train] エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_valid);

    let history = read_loss_history(artifact_dir, settings.num_epochs)?;
    for record in history.records() {
        println!(
            "Epoch {}/{} - loss: {:.4} - val_loss: {:.4}",
            record.epoch, settings.num_epochs, record.loss, record.val_loss
        );
    }

    let test_loss = evaluate(&model_trained.model, dataset_test, settings.batch_size, device)?;

    std::fs::remove_dir_all(artifact_dir).ok();

    Ok(TrainedModel { history, test_loss })
}

/// Learnerのログ (`<dir>/<split>/epoch-<n>/Loss.log`) からエポックごとの損失を読み出す
pub fn read_loss_history(artifact_dir: &Path, num_epochs: usize) -> Result<TrainingHistory> {
    let mut history = TrainingHistory::new();
    for epoch in 1..=num_epochs {
        let loss = read_epoch_loss(artifact_dir, &["train"], epoch)?;
        let val_loss = read_epoch_loss(artifact_dir, &["valid", "validation"], epoch)?;
        history.push(loss, val_loss);
    }
    Ok(history)
}

fn read_epoch_loss(artifact_dir: &Path, splits: &[&str], epoch: usize) -> Result<f64> {
    let path = splits
        .iter()
        .map(|split| {
            artifact_dir
                .join(split)
                .join(format!("epoch-{}", epoch))
                .join("Loss.log")
        })
        .find(|p| p.is_file())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "損失ログが見つかりません: {}/{{{}}}/epoch-{}/Loss.log",
                artifact_dir.display(),
                splits.join(","),
                epoch
            )
        })?;

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("損失ログを読み込めません: {}", path.display()))?;
    mean_logged_loss(&content)
        .ok_or_else(|| anyhow::anyhow!("損失ログが空です: {}", path.display()))
}

/// 1行1バッチ (`value` または `value,count`) のログをサンプル数で重み付け平均する
fn mean_logged_loss(content: &str) -> Option<f64> {
    let mut sum = 0.0f64;
    let mut count = 0.0f64;
    for line in content.lines() {
        let mut fields = line.trim().split(',');
        let value = match fields.next().and_then(|v| v.trim().parse::<f64>().ok()) {
            Some(v) => v,
            None => continue,
        };
        let weight = fields
            .next()
            .and_then(|c| c.trim().parse::<f64>().ok())
            .unwrap_or(1.0);
        sum += value * weight;
        count += weight;
    }
    (count > 0.0).then(|| sum / count)
}

/// データセット全体の平均二乗誤差
pub fn evaluate<B: Backend>(
    model: &RecordingRegressor<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<f64> {
    if dataset.len() == 0 {
        return Err(PipelineError::EmptyPartition("テスト").into());
    }

    let (height, width, _) = dataset.shape();
    let batcher = ImageBatcher::<B>::new(device.clone(), height, width);
    let dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .num_workers(0)
        .build(dataset.clone());

    let mut loss_sum = 0.0f64;
    let mut seen = 0usize;
    for batch in dataloader.iter() {
        let batch_size = batch.targets.dims()[0];
        let item = model.forward_regression(batch.images, batch.targets);
        let loss: f64 = item.loss.into_scalar().elem();

        loss_sum += loss * batch_size as f64;
        seen += batch_size;
    }

    Ok(loss_sum / seen as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::RegressorConfig;
    use crate::types::ChannelOrder;
    use burn::backend::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use std::collections::HashSet;
    use std::path::PathBuf;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn image(size: usize, value: u8) -> Image {
        Image {
            height: size,
            width: size,
            channel_order: ChannelOrder::Rgb,
            pixels: vec![value; size * size * 3],
            source: PathBuf::from(format!("img_{value}.png")),
        }
    }

    #[test]
    fn test_split_is_disjoint_and_exhaustive() {
        let (train, test) = split_indices(10, 0.2, 42).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let train_set: HashSet<_> = train.iter().collect();
        let test_set: HashSet<_> = test.iter().collect();
        assert!(train_set.is_disjoint(&test_set));

        let mut all: Vec<_> = train.iter().chain(&test).copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_deterministic() {
        assert_eq!(split_indices(37, 0.2, 42).unwrap(), split_indices(37, 0.2, 42).unwrap());
        assert_ne!(split_indices(37, 0.2, 42).unwrap(), split_indices(37, 0.2, 7).unwrap());
    }

    #[test]
    fn test_split_default_fraction_is_exact_on_round_counts() {
        for (n, n_train, n_test) in [(5, 4, 1), (10, 8, 2), (20, 16, 4)] {
            let (train, test) = split_indices(n, 0.2, 42).unwrap();
            assert_eq!((train.len(), test.len()), (n_train, n_test), "n = {n}");
        }
        let (train, test) = split_indices(10, 0.7, 42).unwrap();
        assert_eq!((train.len(), test.len()), (3, 7));
    }

    #[test]
    fn test_split_test_size_rounds_up() {
        let (train, test) = split_indices(11, 0.2, 0).unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn test_split_rejects_single_sample() {
        assert!(matches!(
            split_indices(1, 0.2, 42),
            Err(PipelineError::EmptyPartition(_))
        ));
        assert!(split_indices(5, 0.0, 42).is_err());
    }

    #[test]
    fn test_dataset_rejects_length_mismatch() {
        let images = vec![image(10, 0), image(10, 1)];
        assert!(matches!(
            ImageDataset::new(&images, &[0.5]),
            Err(PipelineError::LengthMismatch { images: 2, labels: 1 })
        ));
    }

    #[test]
    fn test_dataset_rejects_mixed_shapes() {
        let images = vec![image(10, 0), image(12, 1)];
        assert!(matches!(
            ImageDataset::new(&images, &[0.1, 0.2]),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_dataset_items_are_normalized_and_aligned() {
        let images: Vec<_> = (0..5).map(|i| image(10, i * 60)).collect();
        let labels: Vec<f32> = (0..5).map(|i| i as f32).collect();
        let dataset = ImageDataset::new(&images, &labels).unwrap();
        let (train, test) = dataset.split(0.2, 42).unwrap();

        assert_eq!(train.len() + test.len(), 5);
        for ds in [&train, &test] {
            for (pos, &orig) in ds.indices().iter().enumerate() {
                let item = ds.get(pos).unwrap();
                assert_eq!(item.label, orig as f32);
                assert_eq!(item.pixels.len(), 300);
                assert!(item.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
                assert_eq!(item.pixels[0], (orig as u8 * 60) as f32 / 255.0);
            }
        }
        assert!(train.get(train.len()).is_none());
    }

    #[test]
    fn test_batcher_shapes() {
        let images: Vec<_> = (0..3).map(|i| image(10, i)).collect();
        let dataset = ImageDataset::new(&images, &[0.0, 0.5, 1.0]).unwrap();
        let items: Vec<_> = (0..3).filter_map(|i| dataset.get(i)).collect();

        let batcher = ImageBatcher::<NdArray<f32>>::new(NdArrayDevice::Cpu, 10, 10);
        let batch = batcher.batch(items, &NdArrayDevice::Cpu);
        assert_eq!(batch.images.dims(), [3, 3, 10, 10]);
        assert_eq!(batch.targets.dims(), [3, 1]);
    }

    #[test]
    fn test_train_model_records_every_epoch() {
        let device = NdArrayDevice::Cpu;
        let images: Vec<_> = (0..6).map(|i| image(12, i * 40)).collect();
        let labels = vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
        let dataset = ImageDataset::new(&images, &labels).unwrap();
        let (train, test) = dataset.split(0.2, 42).unwrap();

        let model = RegressorConfig::new(12, 12, 4)
            .with_conv2_filters(4)
            .with_hidden_units(8)
            .init::<TestBackend>(&device)
            .unwrap();
        let settings = TrainingSettings {
            num_epochs: 3,
            batch_size: 2,
            ..Default::default()
        };

        let artifacts = tempfile::tempdir().unwrap();
        let artifact_dir = artifacts.path().join("training");

        let trained =
            train_model(model, &train, &test, &settings, &device, &artifact_dir).unwrap();
        assert_eq!(trained.history.num_epochs(), 3);
        assert!(trained.history.loss.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(trained.history.val_loss.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(trained.test_loss.is_finite() && trained.test_loss >= 0.0);
        assert!(!artifact_dir.exists());
    }

    #[test]
    fn test_logged_loss_is_weighted_by_count() {
        assert_eq!(mean_logged_loss("1.0,3\n5.0,1\n"), Some(2.0));
        assert_eq!(mean_logged_loss("0.5\n1.5\n"), Some(1.0));
        assert_eq!(mean_logged_loss("\n"), None);
    }

    #[test]
    fn test_read_loss_history_from_learner_logs() {
        let dir = tempfile::tempdir().unwrap();
        for (split, values) in [("train", ["0.4,2", "0.2,2"]), ("valid", ["0.3,2", "0.1,2"])] {
            for (epoch, value) in values.iter().enumerate() {
                let epoch_dir = dir.path().join(split).join(format!("epoch-{}", epoch + 1));
                std::fs::create_dir_all(&epoch_dir).unwrap();
                std::fs::write(epoch_dir.join("Loss.log"), format!("{value}\n")).unwrap();
            }
        }

        let history = read_loss_history(dir.path(), 2).unwrap();
        assert_eq!(history.loss, vec![0.4, 0.2]);
        assert_eq!(history.val_loss, vec![0.3, 0.1]);
        assert!(read_loss_history(dir.path(), 3).is_err());
    }
}
