use std::sync::Arc;

use futures_util::Stream;
use futures_util::stream;
use tokio_util::task::AbortOnDropHandle;

use crate::error::FetchError;
use crate::fetch::{Page, PageFetcher};
use crate::item::{Item, Readiness};
use crate::path::FolderPath;

type PageTask = AbortOnDropHandle<Result<Page, FetchError>>;

// At most one page is in flight ahead of the one being consumed. Page `n + 1`
// is requested only when page `n` came back full.
pub struct PagedReader<F> {
    fetcher: Arc<F>,
    folder: FolderPath,
    name_filter: Option<String>,
    current: std::vec::IntoIter<Item>,
    page_index: u32,
    more_pages: bool,
    prefetch: Option<PageTask>,
    finished: bool,
}

impl<F: PageFetcher> PagedReader<F> {
    /// Fetches page 0 and starts the read-ahead. A failure on page 0 is
    /// returned here, before any item is produced.
    pub async fn open(
        fetcher: Arc<F>,
        folder: FolderPath,
        name_filter: Option<String>,
    ) -> Result<Self, FetchError> {
        let first = fetcher
            .fetch_page(&folder, 0, name_filter.as_deref())
            .await?;
        let mut reader = Self {
            fetcher,
            folder,
            name_filter,
            current: Vec::new().into_iter(),
            page_index: 0,
            more_pages: false,
            prefetch: None,
            finished: false,
        };
        reader.install(0, first);
        Ok(reader)
    }

    pub fn folder(&self) -> &FolderPath {
        &self.folder
    }

    /// Next confirmed item, `None` at the end of the folder. An `Err` is
    /// always the last value produced.
    pub async fn next_item(&mut self) -> Option<Result<Item, FetchError>> {
        loop {
            if self.finished {
                return None;
            }
            // Files the server still reports as processing are not part of the view.
            if let Some(item) = self
                .current
                .by_ref()
                .find(|item| item.readiness() == Readiness::Ready)
            {
                return Some(Ok(item));
            }
            if !self.more_pages {
                self.finished = true;
                return None;
            }
            let Some(task) = self.prefetch.take() else {
                self.finished = true;
                return None;
            };
            let page = match task.await {
                Ok(result) => result,
                Err(join_err) => Err(FetchError::Transient(format!(
                    "page fetch task failed: {join_err}"
                ))),
            };
            match page {
                Ok(page) => self.install(self.page_index + 1, page),
                Err(err) => {
                    tracing::debug!(folder = %self.folder, page = self.page_index + 1, error = %err, "page fetch failed");
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.finished = true;
        self.more_pages = false;
        self.current = Vec::new().into_iter();
        self.prefetch = None;
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Item, FetchError>> + Send {
        stream::unfold(self, |mut reader| async move {
            let item = reader.next_item().await?;
            Some((item, reader))
        })
    }

    fn install(&mut self, index: u32, page: Page) {
        self.page_index = index;
        self.more_pages = page.has_more();
        self.current = page.items.into_iter();
        self.prefetch = if self.more_pages {
            Some(self.spawn_fetch(index + 1))
        } else {
            None
        };
    }

    fn spawn_fetch(&self, index: u32) -> PageTask {
        let fetcher = Arc::clone(&self.fetcher);
        let folder = self.folder.clone();
        let name_filter = self.name_filter.clone();
        AbortOnDropHandle::new(tokio::spawn(async move {
            fetcher
                .fetch_page(&folder, index, name_filter.as_deref())
                .await
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStore;
    use futures_util::StreamExt;
    use std::time::Duration;

    const PAGE: usize = 30;

    fn docs() -> FolderPath {
        FolderPath::new("/Docs", true).unwrap()
    }

    fn store_with(count: usize) -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::new(PAGE));
        store.ensure_folder(&docs());
        store.add_files(&docs(), "f", count);
        store
    }

    #[tokio::test]
    async fn four_pages_need_exactly_four_fetches() {
        let store = store_with(102);
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        let items: Vec<_> = reader.into_stream().collect().await;

        assert_eq!(items.len(), 102);
        assert!(items.iter().all(Result::is_ok));
        let pages: Vec<u32> = store.calls().iter().map(|call| call.page).collect();
        assert_eq!(pages, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn preserves_page_then_item_order() {
        let store = store_with(65);
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        let names: Vec<String> = reader
            .into_stream()
            .map(|item| item.unwrap().path().name().to_string())
            .collect()
            .await;
        let expected: Vec<String> = (0..65).map(|idx| format!("f{idx:03}.bin")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn short_first_page_issues_no_prefetch() {
        let store = store_with(3);
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        assert_eq!(store.call_count(), 1);
        assert_eq!(reader.into_stream().count().await, 3);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_ends_on_empty_page() {
        let store = store_with(60);
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        assert_eq!(reader.into_stream().count().await, 60);
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn prefetch_runs_while_current_page_is_consumed() {
        let store = store_with(45);
        let mut reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        assert!(reader.next_item().await.is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Page 1 has been requested even though page 0 is far from exhausted.
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn first_page_failure_is_returned_by_open() {
        let store = store_with(5);
        store.fail_page(&docs(), 0, FetchError::NotFound("/Docs".into()));
        let result = PagedReader::open(Arc::clone(&store), docs(), None).await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn prefetch_failure_surfaces_when_page_is_reached() {
        let store = store_with(90);
        store.fail_page(&docs(), 1, FetchError::Transient("reset".into()));
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        let items: Vec<_> = reader.into_stream().collect().await;

        assert_eq!(items.len(), PAGE + 1);
        assert!(items[..PAGE].iter().all(Result::is_ok));
        assert_eq!(
            items[PAGE].as_ref().unwrap_err(),
            &FetchError::Transient("reset".into())
        );
    }

    #[tokio::test]
    async fn dropping_mid_stream_aborts_prefetch() {
        let store = store_with(90);
        store.delay_page(1, Duration::from_millis(200));
        store.fail_page(&docs(), 1, FetchError::Transient("never seen".into()));
        let reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        let mut stream = Box::pin(reader.into_stream());
        for _ in 0..5 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(stream);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Page 0 completed, page 1 was started and then aborted.
        assert_eq!(store.call_count(), 2);
        assert_eq!(store.completed_count(), 1);
    }

    #[tokio::test]
    async fn close_discards_pending_page() {
        let store = store_with(90);
        store.delay_page(1, Duration::from_millis(200));
        let mut reader = PagedReader::open(Arc::clone(&store), docs(), None)
            .await
            .unwrap();
        assert!(reader.next_item().await.is_some());
        reader.close();
        assert!(reader.next_item().await.is_none());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.completed_count(), 1);
    }

    #[tokio::test]
    async fn name_filter_is_forwarded_to_every_page() {
        let store = store_with(10);
        let reader = PagedReader::open(Arc::clone(&store), docs(), Some("f003.bin".into()))
            .await
            .unwrap();
        let items: Vec<_> = reader.into_stream().collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(store.calls()[0].filter.as_deref(), Some("f003.bin"));
    }
}
