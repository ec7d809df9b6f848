use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::Path;

use crate::error::PipelineError;
use crate::types::Image;

/// `file,label` 形式のCSVからファイル名 -> ラベルの対応表を読み込む
pub fn load_label_csv(path: &Path) -> Result<HashMap<String, f32>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("ラベルCSVを開けません: {}", path.display()))?;

    let mut labels = HashMap::new();

    for result in reader.records() {
        let record = result?;

        let file = record
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("Missing file"))?
            .to_string();

        let label: f32 = record
            .get(1)
            .ok_or_else(|| anyhow::anyhow!("Missing label"))?
            .parse()
            .with_context(|| format!("ラベルを数値に変換できません: {}", file))?;

        labels.insert(file, label);
    }

    Ok(labels)
}

/// 画像の並び順に合わせてラベルを引き当てる
pub fn labels_for_images(images: &[Image], table: &HashMap<String, f32>) -> Result<Vec<f32>> {
    images
        .iter()
        .map(|img| {
            let name = img
                .source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            table
                .get(&name)
                .copied()
                .ok_or_else(|| anyhow::Error::from(PipelineError::MissingLabel(name)))
        })
        .collect()
}
