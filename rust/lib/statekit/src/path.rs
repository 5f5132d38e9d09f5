use std::fmt;

/// Location of a module in the module tree, as the ordered list of child
/// keys leading to it from the root.
///
/// - `[]`: the root module
/// - `["cart"]`: child `cart` of the root
/// - `["cart", "items"]`: grandchild `items` under `cart`
///
/// Paths are the only addressing mechanism: no module holds a reference to
/// its parent, every lookup walks down from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    /// The root path (empty).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Path extended by one child key.
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    /// Split into (parent path, last key). `None` for the root.
    pub fn split_last(&self) -> Option<(ModulePath, &str)> {
        let (last, parent) = self.0.split_last()?;
        Some((ModulePath(parent.to_vec()), last.as_str()))
    }

    /// Check if `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &ModulePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Two paths overlap when one is an ancestor of (or equal to) the other.
    ///
    /// A write at one path can change what a read at the other observes
    /// exactly when they overlap; siblings never do.
    pub fn overlaps(&self, other: &ModulePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

impl From<&str> for ModulePath {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for ModulePath {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<Vec<String>> for ModulePath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<Vec<&str>> for ModulePath {
    fn from(segments: Vec<&str>) -> Self {
        Self(segments.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for ModulePath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ModulePath {
    fn from(segments: [&str; N]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&ModulePath> for ModulePath {
    fn from(path: &ModulePath) -> Self {
        path.clone()
    }
}
