mod client;
mod session;

pub use client::{
    ApiErrorClass, EntryKind, ListingEntry, ListingPage, StoreClient, StoreError,
};
pub use session::{SessionClient, SessionError, SessionToken};
