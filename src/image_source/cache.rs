//! # 图片缓存模块
//!
//! ## 设计思路
//!
//! 两级缓存，以 URL 的 cache key 为键：
//! - 内存：`lru::LruCache` 保存已解码图片，作为渐进交付的预览来源；同一 URL 只保留像素最多的一份。
//!   同时受条目数与像素字节总量约束，超出字节预算时从最久未使用的一端逐出，单张超过预算的图片不缓存。
//! - 磁盘（可选）：保存远程下载得到的原始字节，文件名为 key 的 SHA-256，超过最大存活时间视为未命中。
//!
//! 缓存未命中从不视为错误，调用方透明地回落到网络/解码路径。

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use image::{DynamicImage, GenericImageView};
use lru::LruCache;
use sha2::{Digest, Sha256};

use super::pipeline;
use super::source::{ImageUrl, RawImageData};
use super::{ImageError, ImageSourceConfig};

const DISK_CACHE_FILE_EXTENSION: &str = "img";

/// 内存 + 磁盘图片缓存。
pub struct ImageCache {
    memory: Mutex<MemoryCache>,
    disk: Option<DiskCache>,
    decode_config: ImageSourceConfig,
}

impl ImageCache {
    pub fn new(config: &ImageSourceConfig) -> Result<Self, ImageError> {
        let capacity = NonZeroUsize::new(config.memory_cache_capacity.max(1))
            .ok_or_else(|| ImageError::ResourceLimit("内存缓存容量无效".to_string()))?;

        let disk = match &config.disk_cache_dir {
            Some(dir) => Some(DiskCache::open(
                dir,
                Duration::from_secs(config.disk_cache_max_age_secs),
            )?),
            None => None,
        };

        Ok(Self {
            memory: Mutex::new(MemoryCache {
                entries: LruCache::new(capacity),
                used_bytes: 0,
                max_bytes: config.memory_cache_max_bytes,
            }),
            disk,
            decode_config: config.clone(),
        })
    }

    /// 查找可用作预览的图片：先内存，后磁盘（命中后解码并提升到内存）。
    pub fn cached_image(&self, url: &ImageUrl) -> Option<Arc<DynamicImage>> {
        if let Some(image) = self.memory_image(url) {
            return Some(image);
        }

        let bytes = self.read_bytes(url)?;
        let raw = RawImageData {
            bytes,
            source_hint: "disk-cache",
        };

        match pipeline::decode_full_resolution(&raw, &self.decode_config, &|| false) {
            Ok(image) => {
                log::debug!("💾 磁盘缓存命中并提升到内存 - URL: {}", url.redacted());
                Some(self.store_decoded(url, image))
            }
            Err(err) => {
                log::warn!("⚠️ 磁盘缓存内容无法解码，已丢弃 - URL: {} 错误: {}", url.redacted(), err);
                if let Some(disk) = &self.disk {
                    disk.remove(url.cache_key());
                }
                None
            }
        }
    }

    /// 仅查询内存缓存。
    pub fn memory_image(&self, url: &ImageUrl) -> Option<Arc<DynamicImage>> {
        let mut memory = self.memory.lock().ok()?;
        memory.entries.get(url.cache_key()).cloned()
    }

    /// 保存解码结果；已有更大的图片时保留旧值。返回缓存中实际保留的那一份。
    pub fn store_decoded(&self, url: &ImageUrl, image: DynamicImage) -> Arc<DynamicImage> {
        let candidate = Arc::new(image);

        let Ok(mut memory) = self.memory.lock() else {
            return candidate;
        };

        if let Some(existing) = memory.entries.get(url.cache_key()) {
            if pixel_count(existing) >= pixel_count(&candidate) {
                return Arc::clone(existing);
            }
        }

        memory.insert(url, Arc::clone(&candidate));
        candidate
    }

    /// 内存缓存当前占用的像素字节数。
    pub fn memory_usage_bytes(&self) -> u64 {
        self.memory.lock().map(|memory| memory.used_bytes).unwrap_or(0)
    }

    /// 读取磁盘缓存中的原始字节。
    pub fn read_bytes(&self, url: &ImageUrl) -> Option<Bytes> {
        self.disk.as_ref()?.read(url.cache_key())
    }

    /// 写入磁盘缓存。写入失败只记录日志。
    pub fn write_bytes(&self, url: &ImageUrl, bytes: &[u8]) {
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.write(url.cache_key(), bytes) {
                log::warn!("⚠️ 写入磁盘缓存失败 - URL: {} 错误: {}", url.redacted(), err);
            }
        }
    }

    pub fn has_disk_cache(&self) -> bool {
        self.disk.is_some()
    }

    pub fn clear_memory(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.entries.clear();
            memory.used_bytes = 0;
        }
    }
}

struct MemoryCache {
    entries: LruCache<String, Arc<DynamicImage>>,
    used_bytes: u64,
    max_bytes: u64,
}

impl MemoryCache {
    fn insert(&mut self, url: &ImageUrl, image: Arc<DynamicImage>) {
        let size = image_bytes(&image);
        if size > self.max_bytes {
            log::debug!(
                "⏭️ 图片超过内存缓存预算，不缓存 - URL: {} 大小: {} bytes",
                url.redacted(),
                size
            );
            if let Some(stale) = self.entries.pop(url.cache_key()) {
                self.used_bytes = self.used_bytes.saturating_sub(image_bytes(&stale));
            }
            return;
        }

        // `push` 返回被替换的同键旧值或被挤出的最久未使用条目
        if let Some((_, displaced)) = self.entries.push(url.cache_key().to_string(), image) {
            self.used_bytes = self.used_bytes.saturating_sub(image_bytes(&displaced));
        }
        self.used_bytes = self.used_bytes.saturating_add(size);

        while self.used_bytes > self.max_bytes {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes = self.used_bytes.saturating_sub(image_bytes(&evicted));
        }
    }
}

fn image_bytes(image: &DynamicImage) -> u64 {
    image.as_bytes().len() as u64
}

fn pixel_count(image: &DynamicImage) -> u64 {
    let (width, height) = image.dimensions();
    width as u64 * height as u64
}

struct DiskCache {
    dir: PathBuf,
    max_age: Duration,
}

impl DiskCache {
    fn open(dir: &Path, max_age: Duration) -> Result<Self, ImageError> {
        fs::create_dir_all(dir)
            .map_err(|e| ImageError::FileSystem(format!("无法创建缓存目录 {}：{}", dir.display(), e)))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            max_age,
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{:x}.{}", digest, DISK_CACHE_FILE_EXTENSION))
    }

    fn read(&self, key: &str) -> Option<Bytes> {
        let path = self.entry_path(key);
        let metadata = fs::metadata(&path).ok()?;

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();

        if age > self.max_age {
            log::debug!("🧹 磁盘缓存已过期 - 文件: {}", path.display());
            let _ = fs::remove_file(&path);
            return None;
        }

        fs::read(&path).ok().map(Bytes::from)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)
    }

    fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.entry_path(key));
    }
}
