use anyhow::{anyhow, Result};
use log::info;
use plotters::prelude::*;
use std::path::Path;

use crate::model::TrainingHistory;

/// 学習・検証損失の推移を折れ線で保存（既存ファイルは上書き）
pub fn render_loss_plot(history: &TrainingHistory, path: &Path) -> Result<()> {
    let (lo, hi) = history.value_range().unwrap_or((0.0, 1.0));
    let pad = ((hi - lo) * 0.1).max(1e-6);
    let last_epoch = history.num_epochs().max(2) as f64;

    let root = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("backend error: {e}"))?;

    {
        let mut chart = ChartBuilder::on(&root)
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(1f64..last_epoch, (lo - pad)..(hi + pad))
            .map_err(|e| anyhow!("chart build error: {e}"))?;

        chart
            .configure_mesh()
            .x_desc("Epoch")
            .y_desc("MSE/Loss")
            .draw()
            .map_err(|e| anyhow!("mesh error: {e}"))?;

        let series = [
            ("MSE/Loss", &history.loss, BLUE),
            ("Val MSE/Loss", &history.val_loss, RED),
        ];
        for (name, values, color) in series {
            let points: Vec<(f64, f64)> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| ((i + 1) as f64, v))
                .collect();

            chart
                .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
                .map_err(|e| anyhow!("draw error: {e}"))?
                .label(name)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));

            chart
                .draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))
                .map_err(|e| anyhow!("draw error: {e}"))?;
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| anyhow!("legend error: {e}"))?;
    }

    root.present()
        .map_err(|e| anyhow!("render error: {e}"))?;

    info!("[Viz] 損失グラフを保存しました: {}", path.display());
    Ok(())
}
