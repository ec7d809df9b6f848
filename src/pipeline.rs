//! 学習パイプライン全体の実行
//!
//! 読み込み → 仮ラベル付与 → プレビュー → 分割・正規化 → モデル構築 → 学習 → 損失グラフ → 評価
//! の順に、すべてメインスレッドで逐次実行します。

use anyhow::{Context, Result};
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};

use burn::backend::{Autodiff, Wgpu};
use burn::tensor::backend::AutodiffBackend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;

use crate::csv_loader::{labels_for_images, load_label_csv};
use crate::error::PipelineError;
use crate::image_loader::read_image_data;
use crate::ml::{train_model, ImageDataset, ModelSummary, RegressorConfig};
use crate::model::{DeviceType, PipelineConfig, TrainingHistory};
use crate::types::Image;
use crate::visualizer::{render_example_image, render_loss_plot, show_figure};

/// 実行結果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub num_images: usize,
    pub preview_index: usize,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub summary: ModelSummary,
    pub history: TrainingHistory,
    pub test_loss: f64,
}

/// 設定に従ってパイプラインを実行
pub fn run(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    config.display();

    let images = read_image_data(
        &config.data_dir,
        &config.image_extension,
        config.channel_order,
    )?;
    if images.is_empty() {
        return Err(PipelineError::EmptyDataset {
            dir: config.data_dir.clone(),
            extension: config.image_extension.clone(),
        }
        .into());
    }

    match config.device_type {
        DeviceType::Cpu => {
            run_with_backend::<Autodiff<NdArray<f32>>>(config, images, NdArrayDevice::Cpu)
        }
        DeviceType::Wgpu => {
            run_with_backend::<Autodiff<Wgpu>>(config, images, WgpuDevice::default())
        }
    }
}

fn run_with_backend<B: AutodiffBackend>(
    config: &PipelineConfig,
    images: Vec<Image>,
    device: B::Device,
) -> Result<RunReport> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "出力ディレクトリを作成できません: {}",
            config.output_dir.display()
        )
    })?;

    let mut rng = match config.labels.label_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let labels = match &config.labels.labels_csv {
        Some(csv_path) => labels_for_images(&images, &load_label_csv(csv_path)?)?,
        None => {
            info!("[Labels] 仮ラベル（一様乱数）を {} 件生成します", images.len());
            placeholder_labels(images.len(), &mut rng)
        }
    };

    let preview_index = rng.gen_range(0..images.len());
    let example_path = config.example_image_path();
    render_example_image(&images[preview_index], labels[preview_index], &example_path)?;
    if config.show_figures {
        show_figure(&example_path)?;
    }

    let dataset = ImageDataset::new(&images, &labels)?;
    let (height, width, channels) = dataset.shape();
    let (dataset_train, dataset_test) =
        dataset.split(config.training.test_fraction, config.training.seed)?;

    info!("[Split] 学習データ: {} 枚", dataset_train.indices().len());
    info!("[Split] テストデータ: {} 枚", dataset_test.indices().len());

    // Conv1のフィルタ数は明示されない限り入力画像の幅に揃える
    let conv1_filters = config.model.conv1_filters.unwrap_or(width);
    let model_config = RegressorConfig::new(height, width, conv1_filters)
        .with_input_channels(channels)
        .with_conv2_filters(config.model.conv2_filters)
        .with_hidden_units(config.model.hidden_units);

    let summary = model_config.summary()?;
    println!("{}", summary);

    let model = model_config.init::<B>(&device)?;
    info!("[Model] 使用デバイス: {:?}", device);

    let trained = train_model(
        model,
        &dataset_train,
        &dataset_test,
        &config.training,
        &device,
        &config.output_dir.join(".training"),
    )?;

    let loss_plot_path = config.loss_plot_path();
    render_loss_plot(&trained.history, &loss_plot_path)?;
    trained.history.save_csv(&config.loss_history_path())?;
    if config.show_figures {
        show_figure(&loss_plot_path)?;
    }

    let test_loss = trained.test_loss;
    println!("\nTest Loss: {}", test_loss);

    Ok(RunReport {
        num_images: images.len(),
        preview_index,
        train_indices: dataset_train.indices().to_vec(),
        test_indices: dataset_test.indices().to_vec(),
        summary,
        history: trained.history,
        test_loss,
    })
}

/// [0, 1) の一様乱数ラベル
pub fn placeholder_labels<R: Rng>(n: usize, rng: &mut R) -> Vec<f32> {
    (0..n).map(|_| rng.gen::<f32>()).collect()
}
