use std::future::Future;

use crate::error::FetchError;
use crate::item::Item;
use crate::path::FolderPath;

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// The server filled the page to its limit, so another page likely follows.
    pub full: bool,
}

impl Page {
    pub fn new(items: Vec<Item>, full: bool) -> Self {
        Self { items, full }
    }

    pub fn has_more(&self) -> bool {
        self.full && !self.items.is_empty()
    }
}

/// Source of listing pages for a folder.
///
/// `name_filter` narrows the page to entries with that exact file name.
/// Implementations return `NotFound` when the folder is gone and
/// `Unauthorized` once their own credential refresh has been exhausted.
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch_page(
        &self,
        folder: &FolderPath,
        page: u32,
        name_filter: Option<&str>,
    ) -> impl Future<Output = Result<Page, FetchError>> + Send;
}

pub trait ItemMutator: Send + Sync + 'static {
    fn remove(&self, item: &Item) -> impl Future<Output = Result<(), FetchError>> + Send;

    fn rename(
        &self,
        item: &Item,
        new_name: &str,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;

    fn relocate(
        &self,
        item: &Item,
        target: &FolderPath,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}
