//! Paths into the remote tree and point-in-time reads of them.

use fieldsync_codec::Value;
use std::fmt;

/// A `/`-separated path into the remote key-value tree.
///
/// Paths are normalized: no leading, trailing or repeated separators. The
/// root is the empty path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DataRef {
    path: String,
}

impl DataRef {
    /// Returns the root reference.
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a reference from a path, normalizing separators.
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self { path }
    }

    /// Returns a reference to `relative` below this one.
    ///
    /// `relative` may itself contain several segments.
    #[must_use]
    pub fn child(&self, relative: impl AsRef<str>) -> Self {
        if self.path.is_empty() {
            return Self::new(relative);
        }
        Self::new(format!("{}/{}", self.path, relative.as_ref()))
    }

    /// Returns the parent reference, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.path.is_empty() {
            return None;
        }
        Some(match self.path.rsplit_once('/') {
            Some((parent, _)) => Self::new(parent),
            None => Self::root(),
        })
    }

    /// Returns the last path segment (empty at the root).
    pub fn key(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Returns the full path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true if this is the root reference.
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Iterates the path segments from the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }
}

impl fmt::Debug for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataRef(/{})", self.path)
    }
}

impl fmt::Display for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)
    }
}

/// A point-in-time read of a location in the remote tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    reference: DataRef,
    value: Option<Value>,
}

impl Snapshot {
    /// Creates a snapshot. A `Null` value is treated as absent.
    pub fn new(reference: DataRef, value: Option<Value>) -> Self {
        Self {
            reference,
            value: value.filter(|v| !v.is_null()),
        }
    }

    /// Returns the location this snapshot was read from.
    pub fn reference(&self) -> &DataRef {
        &self.reference
    }

    /// Returns the last segment of the location.
    pub fn key(&self) -> &str {
        self.reference.key()
    }

    /// Returns the stored value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns true if a value exists at the location.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}
