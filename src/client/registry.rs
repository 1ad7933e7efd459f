//! On-demand lookup of kernel namespaces and callables.
//!
//! The registry caches the kernel's operation listing and answers
//! [`NamespaceRegistry::resolve`] queries against it. The cache is dropped
//! whenever the set of available callables may have changed.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Result;

/// Where a callable was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Compiled ad hoc from a source snippet.
    Snippet,
    /// Part of the kernel workspace or a loaded package.
    Workspace,
}

impl Origin {
    /// Short tag for display.
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Snippet => "snippets",
            Origin::Workspace => "workspace",
        }
    }
}

/// Handle to a kernel callable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallableRef {
    name: String,
    origin: Origin,
}

impl CallableRef {
    /// Create a handle from a fully qualified name.
    pub fn new(name: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            origin,
        }
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the callable came from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Enclosing namespace, if the name is qualified.
    pub fn namespace(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(namespace, _)| namespace)
    }

    /// Unqualified name.
    pub fn short_name(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(_, short)| short)
    }
}

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Q# callable {}>", self.name)
    }
}

/// A namespace and what it directly contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Fully qualified namespace name.
    pub name: String,
    /// Immediate child namespace segments, sorted.
    pub children: Vec<String>,
    /// Unqualified names of callables declared directly in it, sorted.
    pub callables: Vec<String>,
}

/// Outcome of a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The name is a namespace or a prefix of one.
    Namespace(NamespaceInfo),
    /// The name is a callable.
    Callable(CallableRef),
    /// Nothing by that name.
    NotFound,
}

#[derive(Debug, Default)]
struct Listing {
    callables: BTreeSet<String>,
}

impl Listing {
    fn build(names: Vec<String>) -> Self {
        Self {
            callables: names.into_iter().collect(),
        }
    }

    fn namespace(&self, name: &str) -> Option<NamespaceInfo> {
        let prefix = format!("{name}.");
        let mut children = BTreeSet::new();
        let mut callables = Vec::new();

        for qualified in &self.callables {
            let Some(rest) = qualified.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('.') {
                Some((child, _)) => {
                    children.insert(child.to_string());
                }
                None => callables.push(rest.to_string()),
            }
        }

        if children.is_empty() && callables.is_empty() {
            return None;
        }
        Some(NamespaceInfo {
            name: name.to_string(),
            children: children.into_iter().collect(),
            callables,
        })
    }
}

/// Cached view of the callables the kernel exposes.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    listing: Mutex<Option<Listing>>,
    snippets: Mutex<BTreeSet<String>>,
}

impl NamespaceRegistry {
    /// Empty registry; the first lookup loads the listing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name`, loading the operation listing through `load` if the
    /// cache is empty.
    pub fn resolve_with<F>(&self, name: &str, load: F) -> Result<Resolution>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        let mut listing = self.listing.lock();
        if listing.is_none() {
            *listing = Some(Listing::build(load()?));
        }
        let Some(listing) = listing.as_ref() else {
            return Ok(Resolution::NotFound);
        };

        if listing.callables.contains(name) {
            let origin = if self.snippets.lock().contains(name) {
                Origin::Snippet
            } else {
                Origin::Workspace
            };
            return Ok(Resolution::Callable(CallableRef::new(name, origin)));
        }

        Ok(listing
            .namespace(name)
            .map_or(Resolution::NotFound, Resolution::Namespace))
    }

    /// All callables grouped by namespace, loading the listing if needed.
    pub fn by_namespace_with<F>(&self, load: F) -> Result<BTreeMap<String, Vec<String>>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        let mut listing = self.listing.lock();
        if listing.is_none() {
            *listing = Some(Listing::build(load()?));
        }
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for qualified in listing.iter().flat_map(|listing| &listing.callables) {
            let callable = CallableRef::new(qualified.as_str(), Origin::Workspace);
            grouped
                .entry(callable.namespace().unwrap_or_default().to_string())
                .or_default()
                .push(callable.short_name().to_string());
        }
        Ok(grouped)
    }

    /// Remember names produced by a snippet compilation and drop the cache.
    pub fn record_snippets<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        self.snippets
            .lock()
            .extend(names.into_iter().map(str::to_owned));
        self.invalidate();
    }

    /// Drop the cached listing.
    pub fn invalidate(&self) {
        *self.listing.lock() = None;
    }

    /// Whether a listing is cached.
    pub fn is_cached(&self) -> bool {
        self.listing.lock().is_some()
    }
}
