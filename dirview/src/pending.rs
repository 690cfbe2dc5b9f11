use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::item::File;
use crate::path::FolderPath;

pub(crate) struct ReconcileTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Deleted,
    Detached,
}

// The pending set and the task slot share one lock so a registration cannot
// land between a reconciler finding the set empty and releasing its slot.
pub(crate) struct FolderResolver {
    folder: RwLock<FolderPath>,
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    files: HashMap<String, (u64, File)>,
    next_seq: u64,
    task: Option<ReconcileTask>,
    next_generation: u64,
}

impl FolderResolver {
    pub(crate) fn new(folder: FolderPath) -> Self {
        Self {
            folder: RwLock::new(folder),
            state: Mutex::new(PendingState::default()),
        }
    }

    pub(crate) fn folder(&self) -> FolderPath {
        self.folder.read().clone()
    }

    /// Inserts `file` unless its identifier is already pending, in which case
    /// the existing handle is returned. When no reconciler is alive, `start`
    /// is invoked to spawn one.
    pub(crate) fn insert<S>(&self, file: File, start: S) -> File
    where
        S: FnOnce(u64, CancellationToken) -> JoinHandle<()>,
    {
        let mut state = self.state.lock();
        let file = match state.files.get(file.ident()) {
            Some((_, existing)) => existing.clone(),
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                file.set_tracked();
                state
                    .files
                    .insert(file.ident().to_string(), (seq, file.clone()));
                tracing::debug!(path = %file.path(), ident = file.ident(), "pending file added");
                file
            }
        };
        let running = state
            .task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished());
        if !running {
            let generation = state.next_generation;
            state.next_generation += 1;
            let cancel = CancellationToken::new();
            let handle = start(generation, cancel.clone());
            state.task = Some(ReconcileTask {
                generation,
                cancel,
                handle,
            });
        }
        file
    }

    pub(crate) fn confirm(&self, ident: &str) -> Option<File> {
        let removed = self.state.lock().files.remove(ident).map(|(_, file)| file);
        if let Some(file) = &removed {
            file.mark_ready();
            tracing::debug!(path = %file.path(), ident, "pending file confirmed");
        }
        removed
    }

    /// Confirms the pending entry matching a file the server just listed,
    /// first by identifier and then by path.
    pub(crate) fn confirm_listed(&self, listed: &File) -> Option<File> {
        let removed = {
            let mut state = self.state.lock();
            let key = if state.files.contains_key(listed.ident()) {
                Some(listed.ident().to_string())
            } else {
                let path = listed.path();
                state
                    .files
                    .iter()
                    .find(|(_, (_, file))| file.path() == path)
                    .map(|(ident, _)| ident.clone())
            };
            key.and_then(|key| state.files.remove(&key))
                .map(|(_, file)| file)
        };
        if let Some(file) = &removed {
            file.mark_ready();
            tracing::debug!(path = %file.path(), ident = file.ident(), "pending file seen in listing");
        }
        removed
    }

    pub(crate) fn take(&self, ident: &str) -> Option<File> {
        self.state.lock().files.remove(ident).map(|(_, file)| file)
    }

    pub(crate) fn contains(&self, ident: &str) -> bool {
        self.state.lock().files.contains_key(ident)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().files.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().files.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<File> {
        let state = self.state.lock();
        let mut files: Vec<_> = state.files.values().cloned().collect();
        drop(state);
        files.sort_by_key(|(seq, _)| *seq);
        files.into_iter().map(|(_, file)| file).collect()
    }

    pub(crate) fn is_reconciling(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished() && !task.cancel.is_cancelled())
    }

    pub(crate) fn rename_file(&self, ident: &str, new_name: &str) -> bool {
        let state = self.state.lock();
        let Some((_, file)) = state.files.get(ident) else {
            return false;
        };
        match file.path().with_name(new_name) {
            Ok(path) => {
                tracing::debug!(from = %file.path(), to = %path, "pending file renamed");
                file.set_path(path);
                true
            }
            Err(err) => {
                tracing::warn!(ident, error = %err, "pending file rename rejected");
                false
            }
        }
    }

    pub(crate) fn relocate(&self, folder: FolderPath) {
        let state = self.state.lock();
        for (_, file) in state.files.values() {
            match folder.join_file(&file.name()) {
                Ok(path) => file.set_path(path),
                Err(err) => tracing::warn!(ident = file.ident(), error = %err, "pending file path rewrite failed"),
            }
        }
        *self.folder.write() = folder;
    }

    /// Called by the reconciler between polls. Returns true when the set is
    /// empty; the task slot is released only if it still belongs to
    /// `generation`.
    pub(crate) fn finish_if_drained(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if !state.files.is_empty() {
            return false;
        }
        if state
            .task
            .as_ref()
            .is_some_and(|task| task.generation == generation)
        {
            state.task = None;
        }
        true
    }

    pub(crate) fn cancel(&self) {
        if let Some(task) = self.state.lock().task.take() {
            task.cancel.cancel();
        }
    }

    pub(crate) fn shutdown(&self, disposition: Disposition) -> Option<JoinHandle<()>> {
        let (task, files) = {
            let mut state = self.state.lock();
            let task = state.task.take();
            let files: Vec<File> = state.files.drain().map(|(_, (_, file))| file).collect();
            (task, files)
        };
        for file in files {
            match disposition {
                Disposition::Deleted => file.mark_deleted(),
                Disposition::Detached => file.detach(),
            }
        }
        task.map(|task| {
            task.cancel.cancel();
            task.handle
        })
    }

    pub(crate) fn take_all(&self) -> Vec<File> {
        let files = {
            let mut state = self.state.lock();
            if let Some(task) = state.task.take() {
                task.cancel.cancel();
            }
            let mut files: Vec<_> = state.files.drain().map(|(_, entry)| entry).collect();
            files.sort_by_key(|(seq, _)| *seq);
            files
        };
        files.into_iter().map(|(_, file)| file).collect()
    }
}
