use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 画素のチャネル順
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// imageクレートのデコード結果そのまま
    #[default]
    Rgb,
    /// R と B を入れ替えた順（OpenCV互換）
    Bgr,
}

impl std::fmt::Display for ChannelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelOrder::Rgb => write!(f, "RGB"),
            ChannelOrder::Bgr => write!(f, "BGR"),
        }
    }
}

/// デコード済みの3チャネル画像 (H, W, C) の順で平坦化
#[derive(Debug, Clone)]
pub struct Image {
    pub height: usize,
    pub width: usize,
    pub channel_order: ChannelOrder,
    pub pixels: Vec<u8>,
    pub source: PathBuf,
}

impl Image {
    pub const CHANNELS: usize = 3;

    /// (height, width, channels)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, Self::CHANNELS)
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let base = (y * self.width + x) * Self::CHANNELS;
        [self.pixels[base], self.pixels[base + 1], self.pixels[base + 2]]
    }

    /// 表示用にRGB順へ変換したコピーを返す
    pub fn to_rgb(&self) -> Image {
        match self.channel_order {
            ChannelOrder::Rgb => self.clone(),
            ChannelOrder::Bgr => {
                let mut pixels = self.pixels.clone();
                for px in pixels.chunks_exact_mut(Self::CHANNELS) {
                    px.swap(0, 2);
                }
                Image {
                    pixels,
                    channel_order: ChannelOrder::Rgb,
                    ..self.clone()
                }
            }
        }
    }

    /// 0-1に正規化し (C, H, W) の順で平坦化
    pub fn to_normalized_chw(&self) -> Vec<f32> {
        let plane = self.height * self.width;
        let mut data = vec![0.0f32; Self::CHANNELS * plane];
        for (i, px) in self.pixels.chunks_exact(Self::CHANNELS).enumerate() {
            for (channel, value) in px.iter().enumerate() {
                data[channel * plane + i] = normalize_intensity(*value);
            }
        }
        data
    }
}

/// 0-255 の輝度を 0-1 に変換
pub fn normalize_intensity(value: u8) -> f32 {
    value as f32 / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(order: ChannelOrder) -> Image {
        Image {
            height: 1,
            width: 2,
            channel_order: order,
            pixels: vec![10, 20, 30, 255, 0, 128],
            source: PathBuf::from("a.png"),
        }
    }

    #[test]
    fn test_normalize_bounds() {
        for v in 0..=255u8 {
            let n = normalize_intensity(v);
            assert!((0.0..=1.0).contains(&n));
        }
        assert_eq!(normalize_intensity(0), 0.0);
        assert_eq!(normalize_intensity(255), 1.0);
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let rgb = sample(ChannelOrder::Bgr).to_rgb();
        assert_eq!(rgb.channel_order, ChannelOrder::Rgb);
        assert_eq!(rgb.pixel(0, 0), [30, 20, 10]);
        assert_eq!(rgb.pixel(1, 0), [128, 0, 255]);
    }

    #[test]
    fn test_chw_layout() {
        let data = sample(ChannelOrder::Rgb).to_normalized_chw();
        assert_eq!(data.len(), 6);
        // チャネル0 の2画素が先頭に並ぶ
        assert_eq!(data[0], 10.0 / 255.0);
        assert_eq!(data[1], 1.0);
        assert_eq!(data[4], 30.0 / 255.0);
        assert_eq!(data[5], 128.0 / 255.0);
    }
}
