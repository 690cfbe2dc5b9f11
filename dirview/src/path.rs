use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("relative paths are not supported: {0}")]
    Relative(String),
    #[error("file path can not end with a separator: {0}")]
    TrailingSeparator(String),
    #[error("invalid item name: {0:?}")]
    InvalidName(String),
    #[error("the root folder has no parent")]
    Root,
    #[error("new path kind does not match the item: {0}")]
    KindMismatch(String),
}

/// Canonical folder location: always starts and ends with `/`.
///
/// Equality and hashing fold case and include the namespace flag, so
/// `/Docs/` and `/docs/` in the private tree are the same key.
#[derive(Clone)]
pub struct FolderPath {
    full: String,
    private: bool,
    folded: String,
}

#[derive(Clone)]
pub struct FilePath {
    full: String,
    private: bool,
    folded: String,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ItemPath {
    File(FilePath),
    Folder(FolderPath),
}

impl FolderPath {
    pub fn new(path: &str, private: bool) -> Result<Self, PathError> {
        check_absolute(path)?;
        let full = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        Ok(Self::from_canonical(full, private))
    }

    pub fn root(private: bool) -> Self {
        Self::from_canonical("/".to_string(), private)
    }

    fn from_canonical(full: String, private: bool) -> Self {
        let folded = full.to_lowercase();
        Self {
            full,
            private,
            folded,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_root(&self) -> bool {
        self.full == "/"
    }

    pub fn name(&self) -> &str {
        self.full
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<FolderPath> {
        if self.is_root() {
            return None;
        }
        let trimmed = self.full.trim_end_matches('/');
        let cut = trimmed.rfind('/').map(|idx| idx + 1).unwrap_or(1);
        Some(Self::from_canonical(trimmed[..cut].to_string(), self.private))
    }

    pub fn join_file(&self, name: &str) -> Result<FilePath, PathError> {
        check_name(name)?;
        Ok(FilePath::from_parts(format!("{}{name}", self.full), self.private))
    }

    pub fn join_folder(&self, name: &str) -> Result<FolderPath, PathError> {
        check_name(name)?;
        Ok(Self::from_canonical(
            format!("{}{name}/", self.full),
            self.private,
        ))
    }

    pub fn is_within(&self, ancestor: &FolderPath) -> bool {
        self.private == ancestor.private && self.folded.starts_with(&ancestor.folded)
    }

    /// Moves `self` from under `from` to under `to`, keeping the relative tail.
    /// Returns `None` when `self` is not within `from`.
    pub fn rebase(&self, from: &FolderPath, to: &FolderPath) -> Option<FolderPath> {
        if !self.is_within(from) {
            return None;
        }
        let depth = from.segments().count();
        let mut full = to.full.clone();
        for segment in self.segments().skip(depth) {
            full.push_str(segment);
            full.push('/');
        }
        Some(Self::from_canonical(full, to.private))
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.full.split('/').filter(|s| !s.is_empty())
    }
}

impl FilePath {
    pub fn new(path: &str, private: bool) -> Result<Self, PathError> {
        check_absolute(path)?;
        if path.ends_with('/') {
            return Err(PathError::TrailingSeparator(path.to_string()));
        }
        Ok(Self::from_parts(path.to_string(), private))
    }

    fn from_parts(full: String, private: bool) -> Self {
        let folded = full.to_lowercase();
        Self {
            full,
            private,
            folded,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn name(&self) -> &str {
        self.full.rsplit('/').next().unwrap_or_default()
    }

    pub fn folder(&self) -> FolderPath {
        let cut = self.full.rfind('/').map(|idx| idx + 1).unwrap_or(1);
        FolderPath::from_canonical(self.full[..cut].to_string(), self.private)
    }

    pub fn with_name(&self, name: &str) -> Result<FilePath, PathError> {
        self.folder().join_file(name)
    }
}

impl ItemPath {
    pub fn as_str(&self) -> &str {
        match self {
            ItemPath::File(path) => path.as_str(),
            ItemPath::Folder(path) => path.as_str(),
        }
    }

    pub fn is_private(&self) -> bool {
        match self {
            ItemPath::File(path) => path.is_private(),
            ItemPath::Folder(path) => path.is_private(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ItemPath::File(path) => path.name(),
            ItemPath::Folder(path) => path.name(),
        }
    }

    pub fn parent(&self) -> Option<FolderPath> {
        match self {
            ItemPath::File(path) => Some(path.folder()),
            ItemPath::Folder(path) => path.parent(),
        }
    }
}

fn check_absolute(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::Relative(path.to_string()));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name.contains('/') {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn namespace(private: bool) -> &'static str {
    if private { "private" } else { "public" }
}

impl PartialEq for FolderPath {
    fn eq(&self, other: &Self) -> bool {
        self.private == other.private && self.folded == other.folded
    }
}

impl Eq for FolderPath {}

impl Hash for FolderPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.private.hash(state);
        self.folded.hash(state);
    }
}

impl PartialEq for FilePath {
    fn eq(&self, other: &Self) -> bool {
        self.private == other.private && self.folded == other.folded
    }
}

impl Eq for FilePath {}

impl Hash for FilePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.private.hash(state);
        self.folded.hash(state);
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}{}", namespace(self.private), self.full)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}{}", namespace(self.private), self.full)
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemPath::File(path) => path.fmt(f),
            ItemPath::Folder(path) => path.fmt(f),
        }
    }
}

impl fmt::Debug for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FolderPath({self})")
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilePath({self})")
    }
}
