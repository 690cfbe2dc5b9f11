use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::FetchError;
use crate::fetch::PageFetcher;
use crate::item::Item;
use crate::paged::PagedReader;
use crate::path::FolderPath;
use crate::pending::FolderResolver;

pub(crate) type EntryMap = DashMap<FolderPath, Arc<FolderResolver>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Above this many pending files a poll lists the whole folder instead of
    /// asking for each name.
    pub batch_threshold: usize,
    /// Draw each delay uniformly below the doubling schedule so folders
    /// registered together do not poll in lockstep.
    pub jitter: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            batch_threshold: 5,
            jitter: false,
        }
    }
}

impl ReconcilePolicy {
    pub fn with_base(base_delay: Duration, cap_factor: u32, batch_threshold: usize) -> Self {
        Self {
            base_delay,
            max_delay: base_delay.saturating_mul(cap_factor.max(1)),
            batch_threshold,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay, self.jitter)
    }
}

pub(crate) fn spawn<F: PageFetcher>(
    resolver: Arc<FolderResolver>,
    fetcher: Arc<F>,
    policy: ReconcilePolicy,
    entries: Weak<EntryMap>,
    generation: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(resolver, fetcher, policy, entries, generation, cancel))
}

async fn run<F: PageFetcher>(
    resolver: Arc<FolderResolver>,
    fetcher: Arc<F>,
    policy: ReconcilePolicy,
    entries: Weak<EntryMap>,
    generation: u64,
    cancel: CancellationToken,
) {
    let backoff = policy.backoff();
    let mut attempt = 0u32;
    tracing::debug!(folder = %resolver.folder(), generation, "reconciler started");
    loop {
        if resolver.finish_if_drained(generation) {
            prune(&entries, &resolver);
            tracing::debug!(folder = %resolver.folder(), generation, "reconciler drained");
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff.delay(attempt)) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = poll_once(&resolver, &fetcher, policy.batch_threshold) => {
                match result {
                    Ok(confirmed) if confirmed > 0 => {
                        tracing::debug!(folder = %resolver.folder(), confirmed, "reconciliation confirmed files");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(folder = %resolver.folder(), error = %err, "reconciliation poll failed");
                    }
                }
            }
        }
        attempt = attempt.saturating_add(1);
    }
    tracing::debug!(folder = %resolver.folder(), generation, "reconciler cancelled");
}

/// Drops the registry entry for a drained folder unless a registration
/// refilled it or another resolver took over the key.
fn prune(entries: &Weak<EntryMap>, resolver: &Arc<FolderResolver>) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let folder = resolver.folder();
    entries.remove_if(&folder, |_, current| {
        Arc::ptr_eq(current, resolver) && current.is_empty()
    });
}

async fn poll_once<F: PageFetcher>(
    resolver: &FolderResolver,
    fetcher: &Arc<F>,
    batch_threshold: usize,
) -> Result<usize, FetchError> {
    let folder = resolver.folder();
    let pending = resolver.snapshot();
    if pending.is_empty() {
        return Ok(0);
    }

    if pending.len() > batch_threshold {
        let reader = PagedReader::open(Arc::clone(fetcher), folder, None).await?;
        return confirm_all(resolver, reader).await;
    }

    let mut confirmed = 0;
    for file in pending {
        if !resolver.contains(file.ident()) {
            continue;
        }
        let reader = match PagedReader::open(Arc::clone(fetcher), folder.clone(), Some(file.name())).await {
            Ok(reader) => reader,
            // Not listed yet under this name.
            Err(FetchError::NotFound(_)) => continue,
            Err(err) => return Err(err),
        };
        confirmed += confirm_all(resolver, reader).await?;
    }
    Ok(confirmed)
}

async fn confirm_all<F: PageFetcher>(
    resolver: &FolderResolver,
    mut reader: PagedReader<F>,
) -> Result<usize, FetchError> {
    let mut confirmed = 0;
    while let Some(item) = reader.next_item().await {
        if let Item::File(listed) = item?
            && resolver.confirm_listed(&listed).is_some()
        {
            confirmed += 1;
            if resolver.is_empty() {
                reader.close();
                break;
            }
        }
    }
    Ok(confirmed)
}
