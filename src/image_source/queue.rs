//! # 请求队列
//!
//! ## 设计思路
//!
//! 所有图片源共享同一个请求队列：
//! - 并发度由信号量控制（`max_concurrent_requests`），只是调度策略，不影响正确性。
//! - 队列记录“待执行 + 执行中”的操作，供按 ID 取消；操作结束后自动移除。
//! - 不同请求之间不保证完成顺序。
//!
//! ## 实现思路
//!
//! `enqueue` 在运行时上派生一个轻量任务：获取许可 → `spawn_blocking` 执行 `run()` → 释放许可并移除记录。
//! 解码与同步 I/O 因此不会阻塞运行时的异步工作线程。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use super::ImageError;
use super::operation::QueuedOperation;
use super::request::ImageRequestId;

type OperationMap = HashMap<ImageRequestId, Arc<dyn QueuedOperation>>;

/// 有界并发的请求队列。
pub struct RequestQueue {
    runtime: Handle,
    permits: Arc<Semaphore>,
    operations: Arc<Mutex<OperationMap>>,
}

impl RequestQueue {
    pub fn new(runtime: Handle, max_concurrent_requests: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            operations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 提交操作。同一 ID 重复提交时拒绝后者。
    pub fn enqueue(&self, operation: Arc<dyn QueuedOperation>) -> Result<(), ImageError> {
        let id = operation.id();
        {
            let mut operations = lock_operations(&self.operations)?;
            if operations.contains_key(&id) {
                return Err(ImageError::ResourceLimit(format!("请求 {} 已在队列中", id)));
            }
            operations.insert(id, Arc::clone(&operation));
        }

        let permits = Arc::clone(&self.permits);
        let operations = Arc::clone(&self.operations);

        self.runtime.spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => {
                    if operation.is_cancelled() {
                        log::debug!("🚫 请求在排队期间被取消 - 请求: {}", id);
                    } else {
                        let worker = Arc::clone(&operation);
                        if let Err(err) = tokio::task::spawn_blocking(move || worker.run()).await {
                            log::error!("💥 图片请求执行异常 - 请求: {} 错误: {}", id, err);
                        }
                    }
                }
                Err(_) => {
                    log::warn!("⚠️ 请求队列已关闭，丢弃请求 - 请求: {}", id);
                }
            }

            match lock_operations(&operations) {
                Ok(mut operations) => {
                    operations.remove(&id);
                }
                Err(err) => log::error!("❌ 无法移除已完成请求 - 请求: {} 错误: {}", id, err),
            }
        });

        Ok(())
    }

    /// 按 ID 取消。未找到（已完成或未知 ID）时什么也不做，返回 `false`。
    pub fn cancel(&self, id: ImageRequestId) -> bool {
        let operation = match lock_operations(&self.operations) {
            Ok(operations) => operations.get(&id).cloned(),
            Err(err) => {
                log::error!("❌ 取消请求失败 - 请求: {} 错误: {}", id, err);
                None
            }
        };

        match operation {
            Some(operation) => {
                operation.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消当前记录的全部操作。
    pub fn cancel_all(&self) {
        let operations: Vec<_> = match lock_operations(&self.operations) {
            Ok(operations) => operations.values().cloned().collect(),
            Err(err) => {
                log::error!("❌ 批量取消失败：{}", err);
                return;
            }
        };

        log::info!("🛑 取消全部图片请求 - 数量: {}", operations.len());
        for operation in operations {
            operation.cancel();
        }
    }

    /// 当前记录的（待执行 + 执行中）操作数量。
    pub fn len(&self) -> usize {
        lock_operations(&self.operations)
            .map(|operations| operations.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ImageRequestId) -> bool {
        lock_operations(&self.operations)
            .map(|operations| operations.contains_key(&id))
            .unwrap_or(false)
    }
}

fn lock_operations(operations: &Mutex<OperationMap>) -> Result<MutexGuard<'_, OperationMap>, ImageError> {
    operations
        .lock()
        .map_err(|_| ImageError::ResourceLimit("请求队列锁已中毒".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// 记录执行情况的测试操作，可在 `run` 中阻塞直到放行。
    struct CountingOperation {
        id: ImageRequestId,
        cancelled: AtomicBool,
        runs: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl CountingOperation {
        fn new(id: u64, runs: &Arc<AtomicUsize>) -> Self {
            Self {
                id: ImageRequestId::new(id),
                cancelled: AtomicBool::new(false),
                runs: Arc::clone(runs),
                active: Arc::default(),
                peak: Arc::default(),
                gate: Mutex::new(None),
            }
        }
    }

    impl QueuedOperation for CountingOperation {
        fn id(&self) -> ImageRequestId {
            self.id
        }

        fn run(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = self.gate.lock().expect("lock").take() {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            } else {
                std::thread::sleep(Duration::from_millis(20));
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn completed_operations_are_removed() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 2);
        let runs = Arc::new(AtomicUsize::new(0));

        for id in 1..=5 {
            queue
                .enqueue(Arc::new(CountingOperation::new(id, &runs)))
                .expect("enqueue");
        }

        wait_until(|| runs.load(Ordering::SeqCst) == 5 && queue.is_empty());
    }

    #[test]
    fn concurrency_never_exceeds_limit() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 2);
        let runs = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for id in 1..=8 {
            let mut op = CountingOperation::new(id, &runs);
            op.active = Arc::clone(&active);
            op.peak = Arc::clone(&peak);
            queue.enqueue(Arc::new(op)).expect("enqueue");
        }

        wait_until(|| runs.load(Ordering::SeqCst) == 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn cancel_before_start_skips_run() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 1);
        let runs = Arc::new(AtomicUsize::new(0));

        let (release, gate) = mpsc::channel();
        let blocker = CountingOperation::new(1, &runs);
        *blocker.gate.lock().expect("lock") = Some(gate);
        let active = Arc::clone(&blocker.active);
        queue.enqueue(Arc::new(blocker)).expect("enqueue");
        wait_until(|| active.load(Ordering::SeqCst) == 1);

        let waiting = Arc::new(CountingOperation::new(2, &runs));
        queue.enqueue(waiting.clone()).expect("enqueue");

        assert!(queue.cancel(ImageRequestId::new(2)));
        release.send(()).expect("release blocker");

        wait_until(|| queue.is_empty());
        assert!(waiting.is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_unknown_id_is_a_noop() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 1);

        assert!(!queue.cancel(ImageRequestId::new(999)));
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 1);
        let runs = Arc::new(AtomicUsize::new(0));

        let (release, gate) = mpsc::channel();
        let first = CountingOperation::new(7, &runs);
        *first.gate.lock().expect("lock") = Some(gate);
        queue.enqueue(Arc::new(first)).expect("enqueue");

        let second = queue.enqueue(Arc::new(CountingOperation::new(7, &runs)));
        assert!(matches!(second, Err(ImageError::ResourceLimit(_))));

        release.send(()).expect("release");
        wait_until(|| runs.load(Ordering::SeqCst) == 1 && queue.is_empty());
    }

    #[test]
    fn cancel_all_marks_every_tracked_operation() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let queue = RequestQueue::new(runtime.handle().clone(), 1);
        let runs = Arc::new(AtomicUsize::new(0));

        let (release, gate) = mpsc::channel();
        let blocker = Arc::new(CountingOperation::new(1, &runs));
        *blocker.gate.lock().expect("lock") = Some(gate);
        let pending = Arc::new(CountingOperation::new(2, &runs));

        queue.enqueue(blocker.clone()).expect("enqueue");
        queue.enqueue(pending.clone()).expect("enqueue");
        queue.cancel_all();
        release.send(()).expect("release");

        wait_until(|| queue.is_empty());
        assert!(blocker.is_cancelled());
        assert!(pending.is_cancelled());
    }
}
