//! # 相册选择状态
//!
//! ## 设计思路
//!
//! 相册界面本身不在本 crate 内，这里只保留界面依赖的选择状态与事件契约：
//! - 条目 = 图片源 + 是否选中
//! - 可选上限（`max_selected_items_count`），达到上限后不可再选、未选条目变暗
//! - “完成”按钮仅在至少选中一项时可用
//!
//! 界面事件（选中条目、点击完成、点击取消、视图加载完成）统一投递到回调上下文异步执行，
//! 不会阻塞调用方。

use std::fmt;
use std::sync::Arc;

use crate::image_source::{DispatchQueue, LifecycleHook, RemoteImageSource};

/// 相册中的一项。
#[derive(Debug, Clone)]
pub struct PhotoLibraryItem {
    pub image: Arc<RemoteImageSource>,
    pub selected: bool,
}

pub type ItemSelectHook = Arc<dyn Fn(PhotoLibraryItem) + Send + Sync>;

/// 界面事件回调，全部可选。
#[derive(Clone, Default)]
pub struct PhotoLibraryEvents {
    pub on_item_select: Option<ItemSelectHook>,
    pub on_pick_button_tap: Option<LifecycleHook>,
    pub on_cancel_button_tap: Option<LifecycleHook>,
    pub on_view_did_load: Option<LifecycleHook>,
}

impl fmt::Debug for PhotoLibraryEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoLibraryEvents")
            .field("on_item_select", &self.on_item_select.is_some())
            .field("on_pick_button_tap", &self.on_pick_button_tap.is_some())
            .field("on_cancel_button_tap", &self.on_cancel_button_tap.is_some())
            .field("on_view_did_load", &self.on_view_did_load.is_some())
            .finish()
    }
}

/// 相册选择状态。
pub struct PhotoLibrary {
    items: Vec<PhotoLibraryItem>,
    max_selected_items_count: Option<usize>,
    events: PhotoLibraryEvents,
    callback_queue: Arc<dyn DispatchQueue>,
}

impl PhotoLibrary {
    pub fn new(
        images: Vec<Arc<RemoteImageSource>>,
        max_selected_items_count: Option<usize>,
        callback_queue: Arc<dyn DispatchQueue>,
    ) -> Self {
        let items = images
            .into_iter()
            .map(|image| PhotoLibraryItem {
                image,
                selected: false,
            })
            .collect();

        Self {
            items,
            max_selected_items_count,
            events: PhotoLibraryEvents::default(),
            callback_queue,
        }
    }

    pub fn with_events(mut self, events: PhotoLibraryEvents) -> Self {
        self.events = events;
        self
    }

    pub fn items(&self) -> &[PhotoLibraryItem] {
        &self.items
    }

    pub fn selected_items(&self) -> Vec<PhotoLibraryItem> {
        self.items.iter().filter(|item| item.selected).cloned().collect()
    }

    pub fn selected_count(&self) -> usize {
        self.items.iter().filter(|item| item.selected).count()
    }

    pub fn can_select_more_items(&self) -> bool {
        self.max_selected_items_count
            .is_none_or(|max| self.selected_count() < max)
    }

    pub fn dims_unselected_items(&self) -> bool {
        !self.can_select_more_items()
    }

    pub fn pick_button_enabled(&self) -> bool {
        self.selected_count() > 0
    }

    /// 切换条目选中状态，返回切换后的状态。
    ///
    /// 下标越界或已达上限时返回 `None`，状态不变。
    pub fn toggle_selection(&mut self, index: usize) -> Option<bool> {
        let can_select_more = self.can_select_more_items();
        let item = self.items.get_mut(index)?;

        if !item.selected && !can_select_more {
            log::debug!("🚫 已达到可选上限 - 上限: {:?}", self.max_selected_items_count);
            return None;
        }

        item.selected = !item.selected;
        let selected = item.selected;

        if selected {
            if let Some(hook) = &self.events.on_item_select {
                let hook = Arc::clone(hook);
                let snapshot = item.clone();
                self.callback_queue.dispatch(Box::new(move || hook(snapshot)));
            }
        }

        Some(selected)
    }

    pub fn view_did_load(&self) {
        self.fire(self.events.on_view_did_load.as_ref());
    }

    pub fn pick_button_tap(&self) {
        if self.pick_button_enabled() {
            self.fire(self.events.on_pick_button_tap.as_ref());
        }
    }

    pub fn cancel_button_tap(&self) {
        self.fire(self.events.on_cancel_button_tap.as_ref());
    }

    fn fire(&self, hook: Option<&LifecycleHook>) {
        if let Some(hook) = hook {
            let hook = Arc::clone(hook);
            self.callback_queue.dispatch(Box::new(move || hook()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::{ImageUrl, Job, SharedImageServices};
    use std::sync::Mutex;

    struct InlineQueue;

    impl DispatchQueue for InlineQueue {
        fn dispatch(&self, job: Job) {
            job();
        }
    }

    fn library(count: usize, max: Option<usize>) -> PhotoLibrary {
        let services = Arc::new(SharedImageServices::new().expect("service init failed"));
        let images = (0..count)
            .map(|i| {
                let url = ImageUrl::parse(&format!("https://example.com/{}.jpg", i)).expect("url");
                Arc::new(RemoteImageSource::new(url, Arc::clone(&services)))
            })
            .collect();
        PhotoLibrary::new(images, max, Arc::new(InlineQueue))
    }

    #[test]
    fn selection_respects_limit() {
        let mut library = library(3, Some(2));

        assert!(!library.pick_button_enabled());
        assert_eq!(library.toggle_selection(0), Some(true));
        assert_eq!(library.toggle_selection(1), Some(true));
        assert!(library.dims_unselected_items());
        assert!(!library.can_select_more_items());

        assert_eq!(library.toggle_selection(2), None);
        assert_eq!(library.selected_count(), 2);

        assert_eq!(library.toggle_selection(0), Some(false));
        assert!(library.can_select_more_items());
        assert_eq!(library.toggle_selection(2), Some(true));
        assert!(library.pick_button_enabled());
    }

    #[test]
    fn unlimited_selection_and_out_of_range_index() {
        let mut library = library(2, None);

        assert_eq!(library.toggle_selection(0), Some(true));
        assert_eq!(library.toggle_selection(1), Some(true));
        assert!(library.can_select_more_items());
        assert_eq!(library.toggle_selection(9), None);
    }

    #[test]
    fn events_are_dispatched_to_callback_queue() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let select_log = Arc::clone(&log);
        let pick_log = Arc::clone(&log);
        let cancel_log = Arc::clone(&log);
        let load_log = Arc::clone(&log);

        let mut library = library(2, None).with_events(PhotoLibraryEvents {
            on_item_select: Some(Arc::new(move |item: PhotoLibraryItem| {
                select_log
                    .lock()
                    .expect("lock")
                    .push(format!("select {}", item.image.url()));
            })),
            on_pick_button_tap: Some(Arc::new(move || pick_log.lock().expect("lock").push("pick".into()))),
            on_cancel_button_tap: Some(Arc::new(move || cancel_log.lock().expect("lock").push("cancel".into()))),
            on_view_did_load: Some(Arc::new(move || load_log.lock().expect("lock").push("load".into()))),
        });

        library.view_did_load();
        library.pick_button_tap();
        library.toggle_selection(1);
        library.toggle_selection(1);
        library.pick_button_tap();
        library.cancel_button_tap();

        assert_eq!(
            *log.lock().expect("lock"),
            vec!["load", "select https://example.com/1.jpg", "cancel"]
        );
    }
}
