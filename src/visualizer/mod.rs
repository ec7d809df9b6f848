//! 図の描画と表示
//!
//! 図は常にPNGとして保存し、ビューアでの表示は設定で有効にした場合のみ行います。

pub mod display;
pub mod loss_plot;
pub mod preview;

pub use display::show_figure;
pub use loss_plot::render_loss_plot;
pub use preview::render_example_image;
