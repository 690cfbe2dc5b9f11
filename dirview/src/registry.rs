use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;

use crate::fetch::PageFetcher;
use crate::item::{File, Item};
use crate::path::{FolderPath, PathError};
use crate::pending::{Disposition, FolderResolver};
use crate::reconciler::{self, EntryMap, ReconcilePolicy};

#[must_use = "teardown is only complete once awaited"]
#[derive(Default)]
pub struct Teardown {
    handles: Vec<JoinHandle<()>>,
}

impl Teardown {
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(err) = handle.await
                && err.is_panic()
            {
                tracing::warn!(error = %err, "reconciler panicked during teardown");
            }
        }
    }
}

// Lock order: a map shard lock is always taken before a resolver state lock.
pub struct ResolverRegistry<F> {
    entries: Arc<EntryMap>,
    fetcher: Arc<F>,
    policy: ReconcilePolicy,
}

impl<F: PageFetcher> ResolverRegistry<F> {
    pub fn new(fetcher: Arc<F>, policy: ReconcilePolicy) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            fetcher,
            policy,
        }
    }

    pub fn register(
        &self,
        folder: &FolderPath,
        name: &str,
        ident: &str,
        size: u64,
    ) -> Result<File, PathError> {
        let file = File::pending(ident, folder.join_file(name)?, size);
        Ok(self.attach(folder, file))
    }

    fn attach(&self, folder: &FolderPath, file: File) -> File {
        let entry = self
            .entries
            .entry(folder.clone())
            .or_insert_with(|| Arc::new(FolderResolver::new(folder.clone())));
        let resolver = Arc::clone(entry.value());
        let file = self.insert_into(&resolver, file);
        drop(entry);
        file
    }

    fn insert_into(&self, resolver: &Arc<FolderResolver>, file: File) -> File {
        resolver.insert(file, |generation, cancel| {
            reconciler::spawn(
                Arc::clone(resolver),
                Arc::clone(&self.fetcher),
                self.policy,
                Arc::downgrade(&self.entries),
                generation,
                cancel,
            )
        })
    }

    fn resolver(&self, folder: &FolderPath) -> Option<Arc<FolderResolver>> {
        self.entries.get(folder).map(|entry| Arc::clone(entry.value()))
    }

    fn prune_if_empty(&self, folder: &FolderPath, resolver: &Arc<FolderResolver>) {
        let removed = self.entries.remove_if(folder, |_, current| {
            Arc::ptr_eq(current, resolver) && current.is_empty()
        });
        if removed.is_some() {
            resolver.cancel();
            tracing::debug!(folder = %folder, "pending set emptied");
        }
    }

    /// Marks a pending file ready because a listing returned it. Returns the
    /// live handle the first time only.
    pub fn confirm_listed(&self, listed: &File) -> Option<File> {
        let folder = listed.path().folder();
        let resolver = self.resolver(&folder)?;
        let confirmed = resolver.confirm_listed(listed)?;
        self.prune_if_empty(&folder, &resolver);
        Some(confirmed)
    }

    /// A pending file is released as ready. A folder takes every tracked
    /// descendant with it and their pending files are marked deleted.
    pub fn remove(&self, item: &Item) -> Teardown {
        match item {
            Item::File(file) => {
                let folder = file.path().folder();
                if let Some(resolver) = self.resolver(&folder)
                    && resolver.confirm(file.ident()).is_some()
                {
                    self.prune_if_empty(&folder, &resolver);
                }
                Teardown::default()
            }
            Item::Folder(folder) => self.remove_subtree(folder.path(), Disposition::Deleted),
        }
    }

    fn remove_subtree(&self, root: &FolderPath, disposition: Disposition) -> Teardown {
        let keys: Vec<FolderPath> = self
            .entries
            .iter()
            .filter(|entry| entry.key().is_within(root))
            .map(|entry| entry.key().clone())
            .collect();
        let mut teardown = Teardown::default();
        for key in keys {
            if let Some((_, resolver)) = self.entries.remove(&key) {
                tracing::debug!(folder = %key, "pending set removed");
                teardown.handles.extend(resolver.shutdown(disposition));
            }
        }
        teardown
    }

    pub fn rename(&self, item: &Item, new_name: &str) -> Result<(), PathError> {
        match item {
            Item::File(file) => {
                if let Some(resolver) = self.resolver(&file.path().folder()) {
                    resolver.rename_file(file.ident(), new_name);
                }
                Ok(())
            }
            Item::Folder(folder) => {
                let old = folder.path();
                let parent = old.parent().ok_or(PathError::Root)?;
                let new = parent.join_folder(new_name)?;
                self.move_folder(old, &new);
                Ok(())
            }
        }
    }

    /// Each entry is inserted under its new key before the old key is
    /// removed, so a concurrent lookup always finds one of the two.
    pub fn move_folder(&self, old: &FolderPath, new: &FolderPath) {
        let affected: Vec<(FolderPath, Arc<FolderResolver>)> = self
            .entries
            .iter()
            .filter(|entry| entry.key().is_within(old))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (old_key, resolver) in affected {
            let Some(new_key) = resolver.folder().rebase(old, new) else {
                continue;
            };
            tracing::debug!(from = %old_key, to = %new_key, "pending set re-keyed");
            resolver.relocate(new_key.clone());
            if new_key == old_key {
                continue;
            }

            match self.entries.entry(new_key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&resolver));
                }
                Entry::Occupied(slot) => {
                    // The target already tracks uploads of its own; fold ours in.
                    let existing = Arc::clone(slot.get());
                    for file in resolver.take_all() {
                        self.insert_into(&existing, file);
                    }
                }
            }
            self.entries
                .remove_if(&old_key, |_, current| Arc::ptr_eq(current, &resolver));
            // A reconciler draining mid-move prunes by the new key before it
            // exists, which misses.
            self.prune_if_empty(&new_key, &resolver);
        }
    }

    pub fn move_file(&self, file: &File, target: &FolderPath) -> Result<Option<File>, PathError> {
        let destination = target.join_file(&file.name())?;
        let source = file.path().folder();
        let Some(resolver) = self.resolver(&source) else {
            return Ok(None);
        };
        let Some(taken) = resolver.take(file.ident()) else {
            return Ok(None);
        };
        self.prune_if_empty(&source, &resolver);
        taken.set_path(destination);
        tracing::debug!(from = %source, to = %target, ident = taken.ident(), "pending file moved");
        Ok(Some(self.attach(target, taken)))
    }

    pub fn find_pending_files(&self, folder: &FolderPath) -> Vec<File> {
        self.resolver(folder)
            .map(|resolver| resolver.snapshot())
            .unwrap_or_default()
    }

    pub fn contains(&self, folder: &FolderPath) -> bool {
        self.entries.contains_key(folder)
    }

    pub fn is_reconciling(&self, folder: &FolderPath) -> bool {
        self.resolver(folder)
            .is_some_and(|resolver| resolver.is_reconciling())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every folder and waits for all reconcilers to exit. Pending
    /// files are detached, so their waiters resolve with `Cancelled`.
    pub async fn clear_all(&self) {
        let keys: Vec<FolderPath> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let mut teardown = Teardown::default();
        for key in keys {
            if let Some((_, resolver)) = self.entries.remove(&key) {
                teardown.handles.extend(resolver.shutdown(Disposition::Detached));
            }
        }
        tracing::debug!(reconcilers = teardown.handles.len(), "clearing pending registry");
        teardown.wait().await;
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
