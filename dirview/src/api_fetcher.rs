use std::future::Future;

use dirview_core::{ApiErrorClass, EntryKind, ListingEntry, StoreClient, StoreError};
use parking_lot::RwLock;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::FetchError;
use crate::fetch::{ItemMutator, Page, PageFetcher};
use crate::item::{File, Folder, Item, Readiness};
use crate::path::{FilePath, FolderPath, ItemPath, PathError};
use crate::token_provider::TokenProvider;

pub struct ApiFetcher {
    client: RwLock<StoreClient>,
    tokens: Option<tokio::sync::Mutex<TokenProvider>>,
    page_size: u32,
}

impl ApiFetcher {
    pub fn new(client: StoreClient, page_size: u32) -> Self {
        Self {
            client: RwLock::new(client),
            tokens: None,
            page_size: page_size.max(1),
        }
    }

    /// Enables one refresh-and-retry when the server rejects the token.
    pub fn with_token_provider(mut self, provider: TokenProvider) -> Self {
        self.tokens = Some(tokio::sync::Mutex::new(provider));
        self
    }

    async fn call<T, Op, Fut>(&self, op: Op) -> Result<T, FetchError>
    where
        Op: Fn(StoreClient) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let client = self.client.read().clone();
        match op(client).await {
            Ok(value) => Ok(value),
            Err(err) if err.classification() == ApiErrorClass::Auth => {
                tracing::debug!(error = %err, "session token rejected, refreshing");
                let client = self.refreshed_client().await?;
                op(client).await.map_err(fetch_error)
            }
            Err(err) => Err(fetch_error(err)),
        }
    }

    async fn refreshed_client(&self) -> Result<StoreClient, FetchError> {
        let Some(tokens) = &self.tokens else {
            return Err(FetchError::Unauthorized);
        };
        let token = tokens.lock().await.refresh_now().await.map_err(|err| {
            tracing::warn!(error = %err, "session refresh failed");
            FetchError::Unauthorized
        })?;
        let mut client = self.client.write();
        *client = client.with_token(token);
        Ok(client.clone())
    }
}

fn fetch_error(err: StoreError) -> FetchError {
    match (err.classification(), &err) {
        (ApiErrorClass::Auth, _) => FetchError::Unauthorized,
        (ApiErrorClass::NotFound, StoreError::Api { body, .. }) if !body.is_empty() => {
            FetchError::NotFound(body.clone())
        }
        (ApiErrorClass::NotFound, _) => FetchError::NotFound(err.to_string()),
        _ => FetchError::Transient(err.to_string()),
    }
}

fn readiness(state: Option<&str>) -> Readiness {
    match state {
        None => Readiness::Ready,
        Some(state) if state.eq_ignore_ascii_case("ready") => Readiness::Ready,
        Some(state) if state.eq_ignore_ascii_case("deleted") => Readiness::Deleted,
        Some(_) => Readiness::Pending,
    }
}

fn parse_created(raw: Option<&str>) -> Option<OffsetDateTime> {
    let raw = raw?;
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(created) => Some(created),
        Err(err) => {
            tracing::debug!(created = raw, error = %err, "ignoring unparseable timestamp");
            None
        }
    }
}

fn parse_entry(entry: ListingEntry, private: bool) -> Result<Item, PathError> {
    let created = parse_created(entry.created.as_deref());
    Ok(match entry.kind {
        EntryKind::File => Item::File(File::new(
            entry.ident,
            FilePath::new(&entry.path, private)?,
            entry.size.unwrap_or(0),
            created,
            readiness(entry.state.as_deref()),
        )),
        EntryKind::Folder => Item::Folder(Folder::new(
            entry.ident,
            FolderPath::new(&entry.path, private)?,
            created,
        )),
    })
}

fn require_ident(item: &Item) -> Result<&str, FetchError> {
    item.ident()
        .ok_or_else(|| FetchError::NotFound(item.path().to_string()))
}

impl PageFetcher for ApiFetcher {
    async fn fetch_page(
        &self,
        folder: &FolderPath,
        page: u32,
        name_filter: Option<&str>,
    ) -> Result<Page, FetchError> {
        let limit = self.page_size;
        let offset = page.saturating_mul(limit);
        let private = folder.is_private();
        let listing = self
            .call(|client| async move {
                client
                    .list_folder_page(folder.as_str(), private, offset, limit, name_filter)
                    .await
            })
            .await?;

        let full = listing.items.len() >= limit as usize;
        let items = listing
            .items
            .into_iter()
            .filter_map(|entry| {
                let raw_path = entry.path.clone();
                match parse_entry(entry, private) {
                    Ok(item) => Some(item),
                    Err(err) => {
                        tracing::warn!(folder = %folder, path = %raw_path, error = %err, "skipping malformed listing entry");
                        None
                    }
                }
            })
            .collect();
        Ok(Page::new(items, full))
    }
}

impl ItemMutator for ApiFetcher {
    async fn remove(&self, item: &Item) -> Result<(), FetchError> {
        let ident = require_ident(item)?;
        self.call(|client| async move { client.remove_item(ident).await })
            .await
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<(), FetchError> {
        let ident = require_ident(item)?;
        self.call(|client| async move { client.rename_item(ident, new_name).await })
            .await
    }

    async fn relocate(&self, item: &Item, target: &FolderPath) -> Result<(), FetchError> {
        let source = item.path();
        let destination = match &source {
            ItemPath::File(path) => format!("{}{}", target.as_str(), path.name()),
            ItemPath::Folder(path) => format!("{}{}/", target.as_str(), path.name()),
        };
        let (src, dest) = (source.as_str(), destination.as_str());
        let (src_private, dest_private) = (source.is_private(), target.is_private());
        self.call(|client| async move {
            client.move_item(src, src_private, dest, dest_private).await
        })
        .await
    }
}
