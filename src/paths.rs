//! Virtual-path normalization.
//!
//! Every relative path that enters the engine goes through [`VPath`].
//! Normalization happens exactly once, here: forward slashes, no leading
//! slash, Unicode NFC. Case is stored as encountered; comparisons on
//! case-insensitive hosts use [`VPath::cmp_key`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// A normalized relative path inside a content root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VPath(String);

impl VPath {
    /// Normalize an arbitrary relative path string.
    pub fn new(raw: &str) -> Self {
        let mut s: String = raw.nfc().collect();
        if s.contains('\\') {
            s = s.replace('\\', "/");
        }
        while s.starts_with('/') {
            s.remove(0);
        }
        // Collapse doubled separators left by joins.
        while s.contains("//") {
            s = s.replace("//", "/");
        }
        Self(s)
    }

    /// Build from a path relative to `root`. Returns `None` when `path`
    /// is not under `root`.
    pub fn from_root(root: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        Some(Self::new(&rel.to_string_lossy()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased key for comparisons on case-insensitive hosts.
    pub fn cmp_key(&self) -> String {
        self.0.to_lowercase()
    }

    /// Final extension, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let dot = name.rfind('.')?;
        if dot == 0 || dot + 1 == name.len() {
            return None;
        }
        Some(name[dot + 1..].to_lowercase())
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Leading directory component, if any.
    pub fn top_dir(&self) -> Option<&str> {
        let idx = self.0.find('/')?;
        Some(&self.0[..idx])
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        let key = self.cmp_key();
        let prefix = prefix.to_lowercase();
        key == prefix || key.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
    }
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_become_forward_slashes() {
        let p = VPath::new(r"common\traits\00_traits.txt");
        assert_eq!(p.as_str(), "common/traits/00_traits.txt");
    }

    #[test]
    fn leading_slash_is_stripped() {
        assert_eq!(VPath::new("/events/foo.txt").as_str(), "events/foo.txt");
    }

    #[test]
    fn case_preserved_but_compare_key_folds() {
        let p = VPath::new("Common/Traits/File.TXT");
        assert_eq!(p.as_str(), "Common/Traits/File.TXT");
        assert_eq!(p.cmp_key(), "common/traits/file.txt");
    }

    #[test]
    fn extension_and_components() {
        let p = VPath::new("localization/english/traits_l_english.yml");
        assert_eq!(p.extension().as_deref(), Some("yml"));
        assert_eq!(p.file_name(), Some("traits_l_english.yml"));
        assert_eq!(p.top_dir(), Some("localization"));
    }

    #[test]
    fn starts_with_is_component_aware() {
        let p = VPath::new("common/on_action/00_yearly.txt");
        assert!(p.starts_with("common/on_action"));
        assert!(!p.starts_with("common/on"));
    }

    #[test]
    fn from_root_rejects_outside_paths() {
        let root = Path::new("/data/mod");
        assert!(VPath::from_root(root, Path::new("/other/file.txt")).is_none());
        let p = VPath::from_root(root, Path::new("/data/mod/events/e.txt")).unwrap();
        assert_eq!(p.as_str(), "events/e.txt");
    }
}
