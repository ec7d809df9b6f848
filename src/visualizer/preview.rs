use anyhow::{anyhow, Result};
use log::info;
use plotters::prelude::*;
use std::path::Path;

use crate::types::Image;

const FIGURE_SIZE: (u32, u32) = (640, 480);

pub fn example_title(label: f32) -> String {
    format!("Example Input Image w/ label={}", label)
}

/// 画像とラベルをプレビュー図として保存（既存ファイルは上書き）
///
/// 画素は表示用にRGB順へ変換してから1画素ずつ矩形で描画する。
pub fn render_example_image(image: &Image, label: f32, path: &Path) -> Result<()> {
    let rgb = image.to_rgb();
    let (w, h) = (rgb.width as i32, rgb.height as i32);

    let root = BitMapBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("backend error: {e}"))?;

    {
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(example_title(label), ("sans-serif", 20))
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(0..w, 0..h)
            .map_err(|e| anyhow!("chart build error: {e}"))?;

        // 行0を上に表示するため y軸の目盛りは反転して表示
        let flip = |v: &i32| format!("{}", h - v);
        chart
            .configure_mesh()
            .disable_mesh()
            .y_label_formatter(&flip)
            .draw()
            .map_err(|e| anyhow!("mesh error: {e}"))?;

        let rgb = &rgb;
        let pixels = (0..rgb.height).flat_map(move |y| {
            (0..rgb.width).map(move |x| {
                let [r, g, b] = rgb.pixel(x, y);
                let (px, py) = (x as i32, h - 1 - y as i32);
                Rectangle::new([(px, py), (px + 1, py + 1)], RGBColor(r, g, b).filled())
            })
        });
        chart
            .draw_series(pixels)
            .map_err(|e| anyhow!("draw error: {e}"))?;
    }

    root.present()
        .map_err(|e| anyhow!("render error: {e}"))?;

    info!("[Viz] プレビュー画像を保存しました: {}", path.display());
    Ok(())
}
