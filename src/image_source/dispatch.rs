//! # 回调上下文与串行队列
//!
//! ## 设计思路
//!
//! 所有对调用方可见的回调（结果、下载开始/结束、尺寸）都投递到同一个串行上下文，
//! 概念上等同于 UI 主线程，调用方因此无需自行加锁。
//! JPEG 重编码使用另一个独立的串行上下文，避免与解码工作线程争抢。
//!
//! ## 实现思路
//!
//! - `DispatchQueue` 是投递接口，宿主 UI 框架可以用自己的主循环实现它。
//! - `SerialQueue` 是默认实现：一个具名线程 + `mpsc` 通道，按投递顺序逐个执行。
//! - 单个任务 panic 只记录日志，不会终止队列线程。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

use super::ImageError;

/// 投递到队列中的任务。
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// 回调投递接口。
pub trait DispatchQueue: Send + Sync {
    /// 异步投递任务，立即返回。
    fn dispatch(&self, job: Job);
}

/// 基于专属线程的串行队列。
pub struct SerialQueue {
    label: String,
    sender: mpsc::Sender<Job>,
    thread_id: ThreadId,
}

impl SerialQueue {
    /// 创建并启动队列线程，线程名即 `label`。
    pub fn spawn(label: &str) -> Result<Self, ImageError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_label = label.to_string();

        let handle = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("💥 串行队列任务 panic - queue: {}", thread_label);
                    }
                }
                log::debug!("🛑 串行队列已退出 - queue: {}", thread_label);
            })
            .map_err(|e| ImageError::ResourceLimit(format!("无法创建队列线程 {}：{}", label, e)))?;

        Ok(Self {
            label: label.to_string(),
            sender,
            thread_id: handle.thread().id(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 当前线程是否就是该队列的执行线程。
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl DispatchQueue for SerialQueue {
    fn dispatch(&self, job: Job) {
        if self.sender.send(job).is_err() {
            log::warn!("⚠️ 串行队列已关闭，任务被丢弃 - queue: {}", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order_on_named_thread() {
        let queue = SerialQueue::spawn("test-serial").expect("queue spawn failed");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue.dispatch(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                seen.lock().expect("lock poisoned").push((i, name));
            }));
        }
        queue.dispatch(Box::new(move || {
            let _ = done_tx.send(());
        }));

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("queue should drain");

        let seen = seen.lock().expect("lock poisoned");
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("test-serial")));
    }

    #[test]
    fn panicking_job_does_not_stop_queue() {
        let queue = SerialQueue::spawn("test-panic").expect("queue spawn failed");
        let (tx, rx) = mpsc::channel();

        queue.dispatch(Box::new(|| panic!("boom")));
        queue.dispatch(Box::new(move || {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("job should run"), 42);
    }

    #[test]
    fn is_current_only_inside_queue_thread() {
        let queue = Arc::new(SerialQueue::spawn("test-current").expect("queue spawn failed"));
        assert!(!queue.is_current());

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&queue);
        queue.dispatch(Box::new(move || {
            let _ = tx.send(inner.is_current());
        }));

        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("job should run"));
    }
}
