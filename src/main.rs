//! recording_data/ の画像でCNNを学習し、output/ に図を保存する

use recording_cnn::PipelineConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::load_or_default();

    if let Err(e) = recording_cnn::run(&config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
