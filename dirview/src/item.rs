use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ViewError;
use crate::path::{FilePath, FolderPath, ItemPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Ready,
    Deleted,
    Detached,
}

#[derive(Clone)]
pub struct File {
    shared: Arc<FileShared>,
}

struct FileShared {
    ident: String,
    size: u64,
    created: Option<OffsetDateTime>,
    state: Mutex<FileState>,
}

struct FileState {
    path: FilePath,
    readiness: Readiness,
    // Cleared when pending tracking is dropped without a verdict (session end).
    tracked: bool,
    waiter: Option<oneshot::Sender<WaitOutcome>>,
}

impl File {
    pub fn new(
        ident: impl Into<String>,
        path: FilePath,
        size: u64,
        created: Option<OffsetDateTime>,
        readiness: Readiness,
    ) -> Self {
        Self {
            shared: Arc::new(FileShared {
                ident: ident.into(),
                size,
                created,
                state: Mutex::new(FileState {
                    path,
                    readiness,
                    tracked: false,
                    waiter: None,
                }),
            }),
        }
    }

    pub(crate) fn pending(ident: impl Into<String>, path: FilePath, size: u64) -> Self {
        let file = Self::new(
            ident,
            path,
            size,
            Some(OffsetDateTime::now_utc()),
            Readiness::Pending,
        );
        file.set_tracked();
        file
    }

    pub fn ident(&self) -> &str {
        &self.shared.ident
    }

    pub fn size(&self) -> u64 {
        self.shared.size
    }

    pub fn created(&self) -> Option<OffsetDateTime> {
        self.shared.created
    }

    pub fn path(&self) -> FilePath {
        self.shared.state.lock().path.clone()
    }

    pub fn name(&self) -> String {
        self.shared.state.lock().path.name().to_string()
    }

    pub fn readiness(&self) -> Readiness {
        self.shared.state.lock().readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Same underlying handle, not merely the same path.
    pub fn same_handle(&self, other: &File) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn set_path(&self, path: FilePath) {
        self.shared.state.lock().path = path;
    }

    pub(crate) fn set_tracked(&self) {
        self.shared.state.lock().tracked = true;
    }

    pub(crate) fn mark_ready(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.readiness != Readiness::Pending {
            return false;
        }
        state.readiness = Readiness::Ready;
        state.tracked = false;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(WaitOutcome::Ready);
        }
        true
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.shared.state.lock();
        state.readiness = Readiness::Deleted;
        state.tracked = false;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(WaitOutcome::Deleted);
        }
    }

    pub(crate) fn detach(&self) {
        let mut state = self.shared.state.lock();
        state.tracked = false;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(WaitOutcome::Detached);
        }
    }

    /// Only one waiter may be active per file; a second concurrent call fails
    /// with [`ViewError::WaiterBusy`].
    pub async fn wait_until_ready(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ViewError> {
        let rx = {
            let mut state = self.shared.state.lock();
            match state.readiness {
                Readiness::Ready => return Ok(()),
                Readiness::Deleted => return Err(ViewError::Deleted(state.path.to_string())),
                Readiness::Pending => {}
            }
            if !state.tracked {
                return Err(ViewError::Cancelled);
            }
            if state.waiter.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(ViewError::WaiterBusy(state.path.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };

        let outcome = match cancel {
            Some(token) => tokio::select! {
                outcome = rx => outcome,
                _ = token.cancelled() => {
                    self.shared.state.lock().waiter = None;
                    return Err(ViewError::Cancelled);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(WaitOutcome::Ready) => Ok(()),
            Ok(WaitOutcome::Deleted) => Err(ViewError::Deleted(self.path().to_string())),
            Ok(WaitOutcome::Detached) | Err(_) => Err(ViewError::Cancelled),
        }
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other) || self.path() == other.path()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("File")
            .field("ident", &self.shared.ident)
            .field("path", &state.path)
            .field("size", &self.shared.size)
            .field("readiness", &state.readiness)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    ident: Option<String>,
    path: FolderPath,
    created: Option<OffsetDateTime>,
}

impl Folder {
    pub fn new(
        ident: impl Into<String>,
        path: FolderPath,
        created: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            ident: Some(ident.into()),
            path,
            created,
        }
    }

    pub fn root(private: bool) -> Self {
        Self {
            ident: None,
            path: FolderPath::root(private),
            created: None,
        }
    }

    pub fn ident(&self) -> Option<&str> {
        self.ident.as_deref()
    }

    pub fn path(&self) -> &FolderPath {
        &self.path
    }

    pub fn created(&self) -> Option<OffsetDateTime> {
        self.created
    }

    pub(crate) fn with_path(&self, path: FolderPath) -> Folder {
        Folder {
            ident: self.ident.clone(),
            path,
            created: self.created,
        }
    }
}

impl PartialEq for Folder {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    File(File),
    Folder(Folder),
}

impl Item {
    pub fn ident(&self) -> Option<&str> {
        match self {
            Item::File(file) => Some(file.ident()),
            Item::Folder(folder) => folder.ident(),
        }
    }

    pub fn path(&self) -> ItemPath {
        match self {
            Item::File(file) => ItemPath::File(file.path()),
            Item::Folder(folder) => ItemPath::Folder(folder.path().clone()),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            Item::File(file) => file.readiness(),
            Item::Folder(_) => Readiness::Ready,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Item::File(file) => Some(file),
            Item::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Item::Folder(folder) => Some(folder),
            Item::File(_) => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Item::Folder(folder) if folder.path().is_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pending_file(name: &str) -> File {
        let path = FolderPath::root(true).join_file(name).unwrap();
        File::pending(format!("id-{name}"), path, 10)
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_ready() {
        let file = pending_file("a.txt");
        assert!(file.mark_ready());
        assert!(!file.mark_ready());
        file.wait_until_ready(None).await.unwrap();
    }

    #[tokio::test]
    async fn waiter_is_released_by_mark_ready() {
        let file = pending_file("a.txt");
        let waiter = {
            let file = file.clone();
            tokio::spawn(async move { file.wait_until_ready(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        file.mark_ready();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn waiter_observes_deletion() {
        let file = pending_file("a.txt");
        let waiter = {
            let file = file.clone();
            tokio::spawn(async move { file.wait_until_ready(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        file.mark_deleted();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ViewError::Deleted(_)));
        assert!(matches!(
            file.wait_until_ready(None).await,
            Err(ViewError::Deleted(_))
        ));
    }

    #[tokio::test]
    async fn second_waiter_is_rejected() {
        let file = pending_file("a.txt");
        let first = {
            let file = file.clone();
            tokio::spawn(async move { file.wait_until_ready(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            file.wait_until_ready(None).await,
            Err(ViewError::WaiterBusy(_))
        ));
        file.mark_ready();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_releases_waiter_slot() {
        let file = pending_file("a.txt");
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            file.wait_until_ready(Some(&token)).await,
            Err(ViewError::Cancelled)
        ));

        let waiter = {
            let file = file.clone();
            tokio::spawn(async move { file.wait_until_ready(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        file.mark_ready();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn detached_file_does_not_block() {
        let file = pending_file("a.txt");
        file.detach();
        assert!(matches!(
            file.wait_until_ready(None).await,
            Err(ViewError::Cancelled)
        ));
    }

    #[test]
    fn clones_share_path_updates() {
        let file = pending_file("a.txt");
        let clone = file.clone();
        file.set_path(FilePath::new("/b.txt", true).unwrap());
        assert_eq!(clone.path().as_str(), "/b.txt");
        assert!(clone.same_handle(&file));
    }
}
