//! エポックごとの損失履歴
//!
//! 損失曲線の描画と `loss_history.csv` への書き出しに使用します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 1エポック分の記録
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: f64,
}

/// 学習履歴
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f64, val_loss: f64) {
        self.loss.push(loss);
        self.val_loss.push(val_loss);
    }

    pub fn num_epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    /// エポック番号は1始まり
    pub fn records(&self) -> impl Iterator<Item = EpochRecord> + '_ {
        self.loss
            .iter()
            .zip(&self.val_loss)
            .enumerate()
            .map(|(i, (&loss, &val_loss))| EpochRecord {
                epoch: i + 1,
                loss,
                val_loss,
            })
    }

    /// 全系列の最小値と最大値
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.loss
            .iter()
            .chain(&self.val_loss)
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// CSV (`epoch,loss,val_loss`) として保存
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("CSV作成エラー: {}", path.display()))?;
        for record in self.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_one_based() {
        let mut history = TrainingHistory::new();
        history.push(0.5, 0.6);
        history.push(0.3, 0.4);

        let records: Vec<_> = history.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].epoch, 1);
        assert_eq!(records[1].epoch, 2);
        assert_eq!(records[1].val_loss, 0.4);
    }

    #[test]
    fn test_value_range_skips_non_finite() {
        let mut history = TrainingHistory::new();
        history.push(0.5, f64::NAN);
        history.push(0.1, 0.9);
        assert_eq!(history.value_range(), Some((0.1, 0.9)));
        assert_eq!(TrainingHistory::new().value_range(), None);
    }

    #[test]
    fn test_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss_history.csv");
        let mut history = TrainingHistory::new();
        history.push(0.25, 0.5);
        history.save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("epoch,loss,val_loss"));
        assert_eq!(lines.next(), Some("1,0.25,0.5"));
    }
}
