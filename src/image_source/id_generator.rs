//! # 请求 ID 生成器
//!
//! 单调递增、并发安全的整数 ID 生成器。所有图片源共享同一个实例，
//! 以保证 `ImageRequestId` 在进程生命周期内唯一。

use std::sync::atomic::{AtomicU64, Ordering};

/// 线程安全的自增 ID 生成器。
///
/// `fetch_add` 保证并发调用下每次返回的值都不同且严格递增（按获取顺序）。
#[derive(Debug)]
pub struct ThreadSafeIdGenerator {
    next: AtomicU64,
}

impl ThreadSafeIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ThreadSafeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
