use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, ViewError};
use crate::fetch::{ItemMutator, PageFetcher};
use crate::item::{File, Folder, Item, Readiness};
use crate::merge::DirectoryView;
use crate::paged::PagedReader;
use crate::path::{FilePath, FolderPath, ItemPath, PathError};
use crate::reconciler::ReconcilePolicy;
use crate::registry::ResolverRegistry;

pub type ItemStream = BoxStream<'static, Result<Item, FetchError>>;
pub type FileStream = BoxStream<'static, Result<File, FetchError>>;

pub struct DirectoryService<F> {
    fetcher: Arc<F>,
    registry: Arc<ResolverRegistry<F>>,
}

impl<F> Clone for DirectoryService<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<F: PageFetcher> DirectoryService<F> {
    pub fn new(fetcher: Arc<F>, policy: ReconcilePolicy) -> Self {
        let registry = Arc::new(ResolverRegistry::new(Arc::clone(&fetcher), policy));
        Self { fetcher, registry }
    }

    pub fn registry(&self) -> &ResolverRegistry<F> {
        &self.registry
    }

    /// Lists `folder`: confirmed items in server order, then uploads the
    /// server has not listed yet. The first page is fetched before returning.
    pub async fn list_folder(&self, folder: &FolderPath) -> Result<ItemStream, FetchError> {
        let view = DirectoryView::open(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.registry),
            folder.clone(),
        )
        .await?;
        Ok(view.into_stream().boxed())
    }

    /// Files of `folder` and of its subfolders down to `depth` levels, each
    /// folder's files before those of its subfolders. Subfolders that vanish
    /// before they are reached are skipped.
    pub async fn list_folder_files_recursive(
        &self,
        folder: &FolderPath,
        depth: u32,
    ) -> Result<FileStream, FetchError> {
        let root = DirectoryView::open(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.registry),
            folder.clone(),
        )
        .await?;
        let walk = Walk {
            fetcher: Arc::clone(&self.fetcher),
            registry: Arc::clone(&self.registry),
            depth,
            current: Some(Level::new(root, 0)),
            stack: Vec::new(),
        };
        Ok(stream::unfold(walk, |mut walk| async move {
            let file = walk.next_file().await?;
            Some((file, walk))
        })
        .boxed())
    }

    pub async fn wait_until_ready(
        &self,
        file: &File,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ViewError> {
        file.wait_until_ready(cancel).await
    }

    pub async fn clear_session(&self) {
        self.registry.clear_all().await;
    }

    pub fn upload_notification(
        &self,
        folder: &FolderPath,
        name: &str,
        ident: &str,
        size: u64,
    ) -> Result<File, ViewError> {
        Ok(self.registry.register(folder, name, ident, size)?)
    }

    /// `new_path` of `None` means the item was deleted.
    pub async fn item_mutation_notification(
        &self,
        item: &Item,
        new_path: Option<&ItemPath>,
    ) -> Result<(), ViewError> {
        let Some(new_path) = new_path else {
            self.registry.remove(item).wait().await;
            if let Item::File(file) = item {
                file.mark_deleted();
            }
            return Ok(());
        };

        let old_parent = item.path().parent().ok_or(PathError::Root)?;
        let new_parent = new_path.parent().ok_or(PathError::Root)?;
        match (item, new_path) {
            (Item::File(file), ItemPath::File(target)) => {
                let mut tracked = file.clone();
                if old_parent != new_parent
                    && let Some(moved) = self.registry.move_file(file, &new_parent)?
                {
                    tracked = moved;
                }
                if file.name() != target.name() {
                    self.registry.rename(&Item::File(tracked), target.name())?;
                }
                file.set_path(target.clone());
            }
            (Item::Folder(folder), ItemPath::Folder(target)) => {
                self.registry.move_folder(folder.path(), target);
            }
            _ => return Err(PathError::KindMismatch(new_path.to_string()).into()),
        }
        Ok(())
    }

    pub async fn find_file(&self, path: &FilePath) -> Result<Option<File>, FetchError> {
        let folder = path.folder();
        match PagedReader::open(Arc::clone(&self.fetcher), folder.clone(), Some(path.name().to_string())).await {
            Ok(mut reader) => {
                while let Some(item) = reader.next_item().await {
                    if let Item::File(file) = item?
                        && file.path() == *path
                    {
                        reader.close();
                        return Ok(Some(self.registry.confirm_listed(&file).unwrap_or(file)));
                    }
                }
            }
            Err(FetchError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(self
            .registry
            .find_pending_files(&folder)
            .into_iter()
            .find(|file| file.path() == *path))
    }

    pub async fn find_folder(&self, path: &FolderPath) -> Result<Option<Folder>, FetchError> {
        let Some(parent) = path.parent() else {
            return Ok(Some(Folder::root(path.is_private())));
        };
        let mut reader = match PagedReader::open(Arc::clone(&self.fetcher), parent, None).await {
            Ok(reader) => reader,
            Err(FetchError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        while let Some(item) = reader.next_item().await {
            if let Item::Folder(folder) = item?
                && folder.path() == path
            {
                reader.close();
                return Ok(Some(folder));
            }
        }
        Ok(None)
    }

    /// Runs `op` on a file that may still be pending server-side. When it
    /// fails with `NotFound` while the file was pending, waits for the file
    /// to be confirmed and tries exactly once more.
    pub async fn retry_after_ready<T, Op, Fut>(&self, file: &File, mut op: Op) -> Result<T, ViewError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let was_pending = file.readiness() == Readiness::Pending;
        match op().await {
            Err(FetchError::NotFound(path)) if was_pending => {
                tracing::debug!(path = %path, "item not listed yet, waiting for confirmation");
                file.wait_until_ready(None).await?;
                Ok(op().await?)
            }
            result => Ok(result?),
        }
    }
}

impl<F: PageFetcher + ItemMutator> DirectoryService<F> {
    pub async fn delete_item(&self, item: &Item) -> Result<(), ViewError> {
        if item.is_root() {
            return Err(ViewError::RootFolder("deleted"));
        }
        self.mutate(item, || self.fetcher.remove(item)).await?;
        self.item_mutation_notification(item, None).await
    }

    pub async fn rename_item(&self, item: &Item, new_name: &str) -> Result<Item, ViewError> {
        let target = match item {
            Item::File(file) => ItemPath::File(file.path().with_name(new_name)?),
            Item::Folder(folder) => {
                let parent = folder.path().parent().ok_or(ViewError::RootFolder("renamed"))?;
                ItemPath::Folder(parent.join_folder(new_name)?)
            }
        };
        self.mutate(item, || self.fetcher.rename(item, new_name)).await?;
        self.item_mutation_notification(item, Some(&target)).await?;
        Ok(relocated(item, target))
    }

    pub async fn move_item(&self, item: &Item, target: &FolderPath) -> Result<Item, ViewError> {
        if item.is_root() {
            return Err(ViewError::RootFolder("moved"));
        }
        if item.path().parent().as_ref() == Some(target) {
            return Err(ViewError::InvalidTarget(format!(
                "{} is already in {target}",
                item.path()
            )));
        }
        let destination = match item {
            Item::File(file) => ItemPath::File(target.join_file(&file.name())?),
            Item::Folder(folder) => {
                if target.is_within(folder.path()) {
                    return Err(ViewError::InvalidTarget(format!(
                        "{target} is inside {}",
                        folder.path()
                    )));
                }
                ItemPath::Folder(target.join_folder(folder.path().name())?)
            }
        };
        self.mutate(item, || self.fetcher.relocate(item, target)).await?;
        self.item_mutation_notification(item, Some(&destination)).await?;
        Ok(relocated(item, destination))
    }

    async fn mutate<Op, Fut>(&self, item: &Item, mut op: Op) -> Result<(), ViewError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<(), FetchError>>,
    {
        match item {
            Item::File(file) => self.retry_after_ready(file, op).await,
            Item::Folder(_) => Ok(op().await?),
        }
    }
}

fn relocated(item: &Item, target: ItemPath) -> Item {
    match (item, target) {
        (Item::Folder(folder), ItemPath::Folder(path)) => Item::Folder(folder.with_path(path)),
        _ => item.clone(),
    }
}

struct Level<F> {
    view: DirectoryView<F>,
    level: u32,
    subfolders: Vec<FolderPath>,
}

impl<F> Level<F> {
    fn new(view: DirectoryView<F>, level: u32) -> Self {
        Self {
            view,
            level,
            subfolders: Vec::new(),
        }
    }
}

struct Walk<F> {
    fetcher: Arc<F>,
    registry: Arc<ResolverRegistry<F>>,
    depth: u32,
    current: Option<Level<F>>,
    stack: Vec<(FolderPath, u32)>,
}

impl<F: PageFetcher> Walk<F> {
    async fn next_file(&mut self) -> Option<Result<File, FetchError>> {
        loop {
            if self.current.is_none() {
                let (folder, level) = self.stack.pop()?;
                match DirectoryView::open(Arc::clone(&self.fetcher), Arc::clone(&self.registry), folder.clone()).await {
                    Ok(view) => self.current = Some(Level::new(view, level)),
                    Err(FetchError::NotFound(_)) => {
                        tracing::debug!(folder = %folder, "subfolder vanished during walk");
                    }
                    Err(err) => {
                        self.stack.clear();
                        return Some(Err(err));
                    }
                }
                continue;
            }
            let Some(current) = self.current.as_mut() else {
                continue;
            };

            match current.view.next_item().await {
                Some(Ok(Item::File(file))) => return Some(Ok(file)),
                Some(Ok(Item::Folder(folder))) => {
                    if current.level < self.depth {
                        current.subfolders.push(folder.path().clone());
                    }
                }
                Some(Err(err)) => {
                    self.current = None;
                    self.stack.clear();
                    return Some(Err(err));
                }
                None => {
                    let next_level = current.level + 1;
                    let subfolders = std::mem::take(&mut current.subfolders);
                    self.stack
                        .extend(subfolders.into_iter().rev().map(|folder| (folder, next_level)));
                    self.current = None;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
