use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

use crate::error::PipelineError;
use crate::types::{ChannelOrder, Image};

/// ディレクトリ直下の画像を読み込む
///
/// ファイル名が `extension` で終わるファイルのみを対象とし、それ以外は無視する。
/// 並び順はディレクトリ列挙順（OS依存）。デコードに失敗した時点で全体をエラーにする。
pub fn read_image_data(
    data_dir: &Path,
    extension: &str,
    channel_order: ChannelOrder,
) -> Result<Vec<Image>> {
    if !data_dir.is_dir() {
        return Err(PipelineError::MissingDirectory(data_dir.to_path_buf()).into());
    }

    let mut images = Vec::new();

    for entry in std::fs::read_dir(data_dir)
        .with_context(|| format!("ディレクトリを読み込めません: {}", data_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(extension))
            .unwrap_or(false);
        if !matches {
            debug!("[Loader] skip {}", path.display());
            continue;
        }

        images.push(decode_image(&path, channel_order)?);
    }

    info!(
        "[Loader] {} 枚の画像を読み込みました ({})",
        images.len(),
        data_dir.display()
    );

    Ok(images)
}

/// 1枚の画像を3チャネルでデコード
pub fn decode_image(path: &Path, channel_order: ChannelOrder) -> Result<Image> {
    let img = image::open(path)
        .with_context(|| format!("画像のデコードに失敗しました: {}", path.display()))?
        .to_rgb8();
    let (width, height) = img.dimensions();

    let mut pixels = img.into_raw();
    if channel_order == ChannelOrder::Bgr {
        for px in pixels.chunks_exact_mut(Image::CHANNELS) {
            px.swap(0, 2);
        }
    }

    Ok(Image {
        height: height as usize,
        width: width as usize,
        channel_order,
        pixels,
        source: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, size: u32, color: [u8; 3]) {
        RgbImage::from_pixel(size, size, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_only_matching_files_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write_png(dir.path(), &format!("frame_{i}.png"), 12, [i as u8, 0, 0]);
        }
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("frame.png.bak"), "nope").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        write_png(&dir.path().join("nested.png"), "inner.png", 12, [0, 0, 0]);

        let images = read_image_data(dir.path(), ".png", ChannelOrder::Rgb).unwrap();
        assert_eq!(images.len(), 4);
        assert!(images.iter().all(|img| img.shape() == (12, 12, 3)));
    }

    #[test]
    fn test_extension_match_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 10, [1, 2, 3]);
        write_png(dir.path(), "b.PNG", 10, [1, 2, 3]);

        let images = read_image_data(dir.path(), ".png", ChannelOrder::Rgb).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_empty_directory_returns_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let images = read_image_data(dir.path(), ".png", ChannelOrder::Rgb).unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_image_data(&dir.path().join("absent"), ".png", ChannelOrder::Rgb)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingDirectory(_))
        ));
    }

    #[test]
    fn test_corrupt_file_fails_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "ok.png", 10, [0, 0, 0]);
        std::fs::write(dir.path().join("broken.png"), b"not really a png").unwrap();

        assert!(read_image_data(dir.path(), ".png", ChannelOrder::Rgb).is_err());
    }

    #[test]
    fn test_bgr_order_swaps_red_and_blue() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "c.png", 10, [200, 100, 50]);

        let images = read_image_data(dir.path(), ".png", ChannelOrder::Bgr).unwrap();
        assert_eq!(images[0].pixel(3, 3), [50, 100, 200]);
        assert_eq!(images[0].to_rgb().pixel(3, 3), [200, 100, 50]);
    }
}
