use std::collections::HashSet;
use std::sync::Arc;

use futures_util::Stream;
use futures_util::stream;

use crate::error::FetchError;
use crate::fetch::PageFetcher;
use crate::item::{File, Item, Readiness};
use crate::paged::PagedReader;
use crate::path::FolderPath;
use crate::registry::ResolverRegistry;

pub struct DirectoryView<F> {
    reader: PagedReader<F>,
    registry: Arc<ResolverRegistry<F>>,
    // Uploads pending when the listing started; any the listing does not
    // return are still owed to the caller.
    owed: Vec<File>,
    listed: HashSet<String>,
    tail: Option<std::vec::IntoIter<File>>,
}

impl<F: PageFetcher> DirectoryView<F> {
    pub async fn open(
        fetcher: Arc<F>,
        registry: Arc<ResolverRegistry<F>>,
        folder: FolderPath,
    ) -> Result<Self, FetchError> {
        let owed = registry.find_pending_files(&folder);
        let reader = PagedReader::open(fetcher, folder, None).await?;
        Ok(Self {
            reader,
            registry,
            owed,
            listed: HashSet::new(),
            tail: None,
        })
    }

    pub fn folder(&self) -> &FolderPath {
        self.reader.folder()
    }

    pub async fn next_item(&mut self) -> Option<Result<Item, FetchError>> {
        if self.tail.is_none() {
            match self.reader.next_item().await {
                Some(Ok(item)) => {
                    if let Item::File(file) = &item {
                        self.mark_listed(file);
                    }
                    return Some(Ok(item));
                }
                Some(Err(err)) => {
                    self.tail = Some(Vec::new().into_iter());
                    return Some(Err(err));
                }
                None => self.tail = Some(self.unlisted().into_iter()),
            }
        }
        self.tail.as_mut()?.next().map(|file| Ok(Item::File(file)))
    }

    // A listed file stands in for the pending upload it matches, by ident or
    // failing that by path, so that upload is never yielded a second time.
    fn mark_listed(&mut self, file: &File) {
        if let Some(pending) = self.registry.confirm_listed(file) {
            self.listed.insert(pending.ident().to_string());
        }
        let path = file.path();
        for owed in &self.owed {
            if owed.ident() == file.ident() || owed.path() == path {
                self.listed.insert(owed.ident().to_string());
            }
        }
    }

    /// Uploads the listing never returned: those pending at open time plus
    /// any registered since, minus anything deleted or moved out meanwhile.
    fn unlisted(&mut self) -> Vec<File> {
        let folder = self.reader.folder().clone();
        let mut owed = std::mem::take(&mut self.owed);
        for file in self.registry.find_pending_files(&folder) {
            if !owed.iter().any(|known| known.same_handle(&file)) {
                owed.push(file);
            }
        }
        owed.retain(|file| {
            !self.listed.contains(file.ident())
                && file.readiness() != Readiness::Deleted
                && file.path().folder() == folder
        });
        owed
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Item, FetchError>> + Send {
        stream::unfold(self, |mut view| async move {
            let item = view.next_item().await?;
            Some((item, view))
        })
    }
}
