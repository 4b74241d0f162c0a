//! Filesystem path to module identifier resolution.
//!
//! A module identifier is the path of a source unit relative to the working
//! directory, with path separators replaced by `.` and the source suffix
//! removed: `src/cogs/ping.lua` becomes `src.cogs.ping`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Separator between the segments of a [`ModuleId`].
pub const NAMESPACE_SEPARATOR: char = '.';

/// Canonical logical identifier of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Individual namespace segments, e.g. `["src", "cogs", "ping"]`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(NAMESPACE_SEPARATOR)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Maps file paths to module identifiers and back.
///
/// The base directory is captured once when the resolver is built, so later
/// changes of the process working directory do not affect resolution.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
    suffix: String,
}

impl PathResolver {
    pub fn new(base: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            base: normalize(&base.into()),
            suffix: suffix.into(),
        }
    }

    /// Build a resolver anchored at the current working directory.
    pub fn from_current_dir(suffix: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?, suffix))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether the raw path names a source unit at all.
    pub fn is_source(&self, path: &Path) -> bool {
        path.to_string_lossy().ends_with(self.suffix.as_str())
    }

    /// Resolve a raw path (absolute, `./`-relative or bare) to its module id.
    pub fn resolve(&self, filepath: &Path) -> ModuleId {
        let absolute = if filepath.is_absolute() {
            normalize(filepath)
        } else {
            normalize(&self.base.join(filepath))
        };

        let segments: Vec<String> = relative_to(&absolute, &self.base)
            .iter()
            .map(|part| part.to_string_lossy().into_owned())
            .collect();
        let joined = segments.join(&NAMESPACE_SEPARATOR.to_string());

        match joined.strip_suffix(self.suffix.as_str()) {
            Some(stripped) => ModuleId(stripped.to_string()),
            None => ModuleId(joined),
        }
    }

    /// Inverse of [`resolve`](Self::resolve): where the source unit of a module lives.
    pub fn locate(&self, module: &ModuleId) -> PathBuf {
        let mut path = self.base.clone();
        for segment in module.segments() {
            path.push(segment);
        }
        let mut file_name = path.into_os_string();
        file_name.push(&self.suffix);
        PathBuf::from(file_name)
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into its parent.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Express `path` relative to `base`, climbing with `..` when it lies outside.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push(Component::ParentDir);
    }
    for part in &path_parts[common..] {
        out.push(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/home/dev/bot", ".lua")
    }

    #[test]
    fn test_equivalent_spellings_resolve_identically() {
        let r = resolver();
        let expected = ModuleId::from("src.cogs.ping");

        assert_eq!(r.resolve(Path::new("/home/dev/bot/src/cogs/ping.lua")), expected);
        assert_eq!(r.resolve(Path::new("./src/cogs/ping.lua")), expected);
        assert_eq!(r.resolve(Path::new("src/cogs/ping.lua")), expected);
        assert_eq!(r.resolve(Path::new("src/./cogs/../cogs/ping.lua")), expected);
    }

    #[test]
    fn test_only_trailing_suffix_is_stripped() {
        let r = resolver();
        assert_eq!(
            r.resolve(Path::new("src/cogs.lua.d/ping.lua")).as_str(),
            "src.cogs.lua.d.ping"
        );
        assert_eq!(r.resolve(Path::new("notes.txt")).as_str(), "notes.txt");
    }

    #[test]
    fn test_paths_outside_base_climb() {
        let r = resolver();
        assert_eq!(r.resolve(Path::new("/home/dev/other/x.lua")).as_str(), "...other.x");
    }

    #[test]
    fn test_base_is_normalized() {
        let r = PathResolver::new("/home/dev/./bot/", ".lua");
        assert_eq!(r.base(), Path::new("/home/dev/bot"));
        assert_eq!(r.resolve(Path::new("/home/dev/bot/a.lua")).as_str(), "a");
    }

    #[test]
    fn test_locate_inverts_resolve() {
        let r = resolver();
        let id = r.resolve(Path::new("./src/cogs/ping.lua"));
        assert_eq!(r.locate(&id), PathBuf::from("/home/dev/bot/src/cogs/ping.lua"));
    }

    #[test]
    fn test_is_source() {
        let r = resolver();
        assert!(r.is_source(Path::new("src/cogs/ping.lua")));
        assert!(!r.is_source(Path::new("src/cogs/ping.json")));
        assert!(!r.is_source(Path::new("README.md")));
    }
}
