pub mod api_fetcher;
pub mod backoff;
pub mod config;
pub mod error;
pub mod fetch;
pub mod item;
pub mod logging;
pub mod merge;
pub mod paged;
pub mod path;
mod pending;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod token_provider;

#[cfg(test)]
mod test_support;

pub use error::{FetchError, ViewError};
pub use fetch::{ItemMutator, Page, PageFetcher};
pub use item::{File, Folder, Item, Readiness};
pub use path::{FilePath, FolderPath, ItemPath, PathError};
pub use reconciler::ReconcilePolicy;
pub use service::DirectoryService;
