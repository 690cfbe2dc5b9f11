use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::FetchError;
use crate::fetch::{ItemMutator, Page, PageFetcher};
use crate::item::{File, Folder, Item, Readiness};
use crate::path::FolderPath;

#[derive(Debug, Clone)]
enum Entry {
    File {
        ident: String,
        name: String,
        size: u64,
        visible: bool,
    },
    Folder {
        ident: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub folder: String,
    pub page: u32,
    pub filter: Option<String>,
}

pub struct FakeStore {
    page_size: usize,
    folders: Mutex<HashMap<FolderPath, Vec<Entry>>>,
    failures: Mutex<HashMap<(String, u32), FetchError>>,
    delays: Mutex<HashMap<u32, Duration>>,
    calls: Mutex<Vec<FetchCall>>,
    completed: AtomicUsize,
}

impl FakeStore {
    pub fn new(page_size: usize) -> Self {
        let store = Self {
            page_size,
            folders: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        };
        store.ensure_folder(&FolderPath::root(true));
        store.ensure_folder(&FolderPath::root(false));
        store
    }

    pub fn ensure_folder(&self, folder: &FolderPath) {
        self.folders.lock().entry(folder.clone()).or_default();
    }

    pub fn add_folder(&self, parent: &FolderPath, name: &str) -> FolderPath {
        let child = parent.join_folder(name).unwrap();
        self.ensure_folder(parent);
        self.folders
            .lock()
            .entry(parent.clone())
            .or_default()
            .push(Entry::Folder {
                ident: format!("dir-{}", child.as_str()),
                name: name.to_string(),
            });
        self.ensure_folder(&child);
        child
    }

    pub fn add_file(&self, folder: &FolderPath, name: &str, ident: &str, size: u64) {
        self.push_file(folder, name, ident, size, true);
    }

    /// Stored server-side but not yet returned by listings.
    pub fn add_hidden_file(&self, folder: &FolderPath, name: &str, ident: &str, size: u64) {
        self.push_file(folder, name, ident, size, false);
    }

    pub fn add_files(&self, folder: &FolderPath, prefix: &str, count: usize) {
        for idx in 0..count {
            self.add_file(
                folder,
                &format!("{prefix}{idx:03}.bin"),
                &format!("{prefix}-{idx}"),
                idx as u64,
            );
        }
    }

    fn push_file(&self, folder: &FolderPath, name: &str, ident: &str, size: u64, visible: bool) {
        self.folders
            .lock()
            .entry(folder.clone())
            .or_default()
            .push(Entry::File {
                ident: ident.to_string(),
                name: name.to_string(),
                size,
                visible,
            });
    }

    pub fn reveal(&self, ident: &str) {
        for entries in self.folders.lock().values_mut() {
            for entry in entries.iter_mut() {
                if let Entry::File {
                    ident: id, visible, ..
                } = entry
                    && id == ident
                {
                    *visible = true;
                }
            }
        }
    }

    pub fn fail_page(&self, folder: &FolderPath, page: u32, err: FetchError) {
        self.failures
            .lock()
            .insert((folder.as_str().to_lowercase(), page), err);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn delay_page(&self, page: u32, delay: Duration) {
        self.delays.lock().insert(page, delay);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Fetches that ran to completion, as opposed to being aborted mid-flight.
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn build_item(folder: &FolderPath, entry: &Entry) -> Item {
        match entry {
            Entry::File {
                ident, name, size, ..
            } => Item::File(File::new(
                ident.clone(),
                folder.join_file(name).unwrap(),
                *size,
                None,
                Readiness::Ready,
            )),
            Entry::Folder { ident, name } => Item::Folder(Folder::new(
                ident.clone(),
                folder.join_folder(name).unwrap(),
                None,
            )),
        }
    }

    fn locate(&self, ident: &str) -> Option<(FolderPath, usize)> {
        let folders = self.folders.lock();
        folders.iter().find_map(|(folder, entries)| {
            entries
                .iter()
                .position(|entry| match entry {
                    Entry::File {
                        ident: id, visible, ..
                    } => id == ident && *visible,
                    Entry::Folder { ident: id, .. } => id == ident,
                })
                .map(|idx| (folder.clone(), idx))
        })
    }
}

impl PageFetcher for FakeStore {
    async fn fetch_page(
        &self,
        folder: &FolderPath,
        page: u32,
        name_filter: Option<&str>,
    ) -> Result<Page, FetchError> {
        self.calls.lock().push(FetchCall {
            folder: folder.as_str().to_string(),
            page,
            filter: name_filter.map(str::to_string),
        });
        let delay = self.delays.lock().get(&page).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .get(&(folder.as_str().to_lowercase(), page))
            .cloned();
        if let Some(err) = failure {
            return Err(err);
        }

        let folders = self.folders.lock();
        let entries = folders
            .get(folder)
            .ok_or_else(|| FetchError::NotFound(folder.to_string()))?;
        let matching: Vec<&Entry> = entries
            .iter()
            .filter(|entry| match (entry, name_filter) {
                (Entry::File { visible: false, .. }, _) => false,
                (_, None) => true,
                (Entry::File { name, .. }, Some(filter)) => name.eq_ignore_ascii_case(filter),
                (Entry::Folder { .. }, Some(_)) => false,
            })
            .collect();
        let start = (page as usize) * self.page_size;
        let items: Vec<Item> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|entry| Self::build_item(folder, entry))
            .collect();
        let full = items.len() == self.page_size;
        Ok(Page::new(items, full))
    }
}

impl ItemMutator for FakeStore {
    async fn remove(&self, item: &Item) -> Result<(), FetchError> {
        let ident = item.ident().unwrap_or_default();
        let (folder, idx) = self
            .locate(ident)
            .ok_or_else(|| FetchError::NotFound(item.path().to_string()))?;
        let mut folders = self.folders.lock();
        if let Some(entries) = folders.get_mut(&folder) {
            entries.remove(idx);
        }
        if let Item::Folder(removed) = item {
            folders.retain(|path, _| !path.is_within(removed.path()));
        }
        Ok(())
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<(), FetchError> {
        let ident = item.ident().unwrap_or_default();
        let (folder, idx) = self
            .locate(ident)
            .ok_or_else(|| FetchError::NotFound(item.path().to_string()))?;
        let mut folders = self.folders.lock();
        if let Some(entry) = folders.get_mut(&folder).and_then(|e| e.get_mut(idx)) {
            match entry {
                Entry::File { name, .. } | Entry::Folder { name, .. } => {
                    *name = new_name.to_string()
                }
            }
        }
        Ok(())
    }

    async fn relocate(&self, item: &Item, target: &FolderPath) -> Result<(), FetchError> {
        let ident = item.ident().unwrap_or_default();
        let (folder, idx) = self
            .locate(ident)
            .ok_or_else(|| FetchError::NotFound(item.path().to_string()))?;
        let mut folders = self.folders.lock();
        let entry = match folders.get_mut(&folder) {
            Some(entries) => entries.remove(idx),
            None => return Err(FetchError::NotFound(folder.to_string())),
        };
        folders.entry(target.clone()).or_default().push(entry);
        Ok(())
    }
}
