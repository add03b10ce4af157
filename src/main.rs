//! # 媒体选择器图片核心：演示入口
//!
//! 用法：`media-picker [--config <配置.json>] <URL 或文件路径>...`
//!
//! 对每个参数依次输出：全尺寸像素、256px 缩略图尺寸、JPEG 导出字节数。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use media_picker::error::PickerError;
use media_picker::image_source::{
    DeliveryMode, ImageRequestOptions, ImageRequestResult, ImageSize, ImageSizeOption,
    ImageSourceConfig, ImageUrl, RemoteImageSource, SharedImageServices,
};

const THUMBNAIL_SIZE: u32 = 256;
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<(), PickerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config_path, inputs) = parse_args(std::env::args().skip(1));
    let config = match &config_path {
        Some(path) => ImageSourceConfig::load_from_path(path),
        None => ImageSourceConfig::default(),
    };

    if inputs.is_empty() {
        log::warn!("⚠️ 未提供图片地址，用法: media-picker [--config <path>] <url|path>...");
        return Ok(());
    }

    let services = Arc::new(SharedImageServices::with_config(config)?);

    for input in &inputs {
        let url = match resolve_input(input) {
            Ok(url) => url,
            Err(err) => {
                log::error!("❌ 无法解析输入 - 输入: {} 错误: {}", input, err);
                continue;
            }
        };

        let source = RemoteImageSource::new(url, Arc::clone(&services));
        describe(&source);
    }

    Ok(())
}

fn parse_args(args: impl Iterator<Item = String>) -> (Option<PathBuf>, Vec<String>) {
    let mut config = None;
    let mut inputs = Vec::new();
    let mut args = args;

    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = args.next().map(PathBuf::from);
        } else {
            inputs.push(arg);
        }
    }

    (config, inputs)
}

fn resolve_input(input: &str) -> Result<ImageUrl, PickerError> {
    if input.contains("://") || input.starts_with("data:") {
        return Ok(ImageUrl::parse(input)?);
    }

    let path = Path::new(input).canonicalize()?;
    Ok(ImageUrl::from_file_path(path)?)
}

fn describe(source: &RemoteImageSource) {
    let name = source.url().redacted();

    let (tx, rx) = mpsc::channel();
    source.image_size(move |size| {
        let _ = tx.send(size);
    });
    match rx.recv_timeout(WAIT_TIMEOUT) {
        Ok(Some(size)) => println!("{}: 尺寸 {}x{}", name, size.width, size.height),
        Ok(None) => println!("{}: 无法解码", name),
        Err(_) => println!("{}: 等待尺寸超时", name),
    }

    let (tx, rx) = mpsc::channel();
    let options = ImageRequestOptions::new(
        ImageSizeOption::FitSize(ImageSize::new(THUMBNAIL_SIZE, THUMBNAIL_SIZE)),
        DeliveryMode::Best,
    );
    source.request_image(options, move |result: ImageRequestResult<ImageSize>| {
        let _ = tx.send(result.image);
    });
    match rx.recv_timeout(WAIT_TIMEOUT) {
        Ok(Some(size)) => println!("{}: 缩略图 {}x{}", name, size.width, size.height),
        Ok(None) => println!("{}: 缩略图生成失败", name),
        Err(_) => println!("{}: 等待缩略图超时", name),
    }

    let (tx, rx) = mpsc::channel();
    source.full_resolution_image_data(move |data| {
        let _ = tx.send(data.map(|bytes| bytes.len()));
    });
    match rx.recv_timeout(WAIT_TIMEOUT) {
        Ok(Some(len)) => println!("{}: JPEG {} bytes", name, len),
        Ok(None) => println!("{}: JPEG 导出失败", name),
        Err(_) => println!("{}: 等待 JPEG 导出超时", name),
    }
}
