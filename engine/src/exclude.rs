//! Exclusion rules applied while scanning.
//!
//! A path is excluded when any of these hold:
//! - one of its segments matches a glob pattern (`*.tmp`, `~*`)
//! - a pattern ending in `/` equals one of its directory segments (`cache/`)
//! - a pattern of the form `base/**` matches one of its leading directories
//! - its name is explicitly excluded, or it lies beneath an excluded path
//! - it is a file whose size falls outside the configured bounds

use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::error::EngineError;

#[derive(Debug, Clone)]
enum CompiledPattern {
    /// `name/`: a directory segment equal to `name`
    DirName(String),
    /// `base/**`: everything below a directory prefix matching `base`
    Subtree(Pattern),
    /// plain glob, tried against each segment and the whole relative path
    Glob(Pattern),
}

impl CompiledPattern {
    fn compile(raw: &str) -> Result<Self, glob::PatternError> {
        if let Some(base) = raw.strip_suffix("/**") {
            return Ok(CompiledPattern::Subtree(Pattern::new(base)?));
        }
        if let Some(name) = raw.strip_suffix('/') {
            return Ok(CompiledPattern::DirName(name.to_string()));
        }
        Ok(CompiledPattern::Glob(Pattern::new(raw)?))
    }

    /// `segments` is the relative path split on `/`; for a file the last
    /// segment is the file name and is not a directory segment.
    fn matches(&self, relpath: &str, segments: &[&str], is_dir: bool) -> bool {
        let dir_segments = if is_dir {
            segments
        } else {
            &segments[..segments.len().saturating_sub(1)]
        };

        match self {
            CompiledPattern::DirName(name) => dir_segments.iter().any(|s| s == name),
            CompiledPattern::Subtree(base) => (1..=dir_segments.len())
                .any(|depth| base.matches(&dir_segments[..depth].join("/"))),
            CompiledPattern::Glob(pattern) => {
                pattern.matches(relpath) || segments.iter().any(|s| pattern.matches(s))
            }
        }
    }
}

/// Rules deciding which entries a scan skips.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    patterns: Vec<String>,
    compiled: Vec<CompiledPattern>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    excluded_names: Vec<String>,
    excluded_paths: Vec<PathBuf>,
}

impl ExclusionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a glob pattern. Blank and duplicate patterns are ignored.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), EngineError> {
        let pattern = pattern.trim();
        if pattern.is_empty() || self.patterns.iter().any(|p| p == pattern) {
            return Ok(());
        }

        let compiled =
            CompiledPattern::compile(pattern).map_err(|e| EngineError::InvalidPattern {
                pattern: pattern.to_string(),
                source: e,
            })?;
        self.patterns.push(pattern.to_string());
        self.compiled.push(compiled);
        debug!(pattern, "added exclusion pattern");
        Ok(())
    }

    /// Set inclusive size bounds for files; `None` leaves that side open.
    pub fn add_size_limit(&mut self, min_size: Option<u64>, max_size: Option<u64>) {
        self.min_size = min_size;
        self.max_size = max_size;
    }

    /// Exclude every entry with exactly this file or directory name.
    pub fn add_excluded_name(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() && !self.excluded_names.iter().any(|n| n == name) {
            self.excluded_names.push(name.to_string());
        }
    }

    /// Exclude an entry and everything beneath it.
    ///
    /// Absolute paths are compared against the entry's absolute path,
    /// relative ones against its path relative to the scan root.
    pub fn add_excluded_path<P: AsRef<Path>>(&mut self, path: P) {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() && !self.excluded_paths.iter().any(|p| p == path) {
            self.excluded_paths.push(path.to_path_buf());
        }
    }

    /// Rewrite absolute excluded paths under `root` as paths relative to it,
    /// so the same rules also hold for a tree mirrored from `root`.
    ///
    /// `root` is expected to be resolved; excluded paths are resolved before
    /// comparing when they exist. Absolute paths outside `root` are kept.
    pub fn rebased_onto(&self, root: &Path) -> ExclusionRules {
        let mut rebased = self.clone();
        rebased.excluded_paths = self
            .excluded_paths
            .iter()
            .map(|excluded| {
                if !excluded.is_absolute() {
                    return excluded.clone();
                }
                let resolved = excluded.canonicalize().unwrap_or_else(|_| excluded.clone());
                match resolved
                    .strip_prefix(root)
                    .or_else(|_| excluded.strip_prefix(root))
                {
                    Ok(relative) if !relative.as_os_str().is_empty() => {
                        debug!(excluded = %excluded.display(), relative = %relative.display(), "rebased excluded path");
                        relative.to_path_buf()
                    }
                    _ => excluded.clone(),
                }
            })
            .collect();
        rebased.excluded_paths.dedup();
        rebased
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
            && self.excluded_names.is_empty()
            && self.excluded_paths.is_empty()
            && self.min_size.is_none()
            && self.max_size.is_none()
    }

    /// Whether a directory should be pruned from the walk.
    pub fn excludes_dir(&self, relpath: &str, absolute: &Path) -> bool {
        self.excluded_by_path(relpath, absolute, true)
    }

    /// Whether a regular file of `size` bytes should be skipped.
    pub fn excludes_file(&self, relpath: &str, absolute: &Path, size: u64) -> bool {
        if self.excluded_by_path(relpath, absolute, false) {
            return true;
        }
        if self.min_size.is_some_and(|min| size < min) || self.max_size.is_some_and(|max| size > max)
        {
            debug!(relpath, size, "excluded by size bounds");
            return true;
        }
        false
    }

    fn excluded_by_path(&self, relpath: &str, absolute: &Path, is_dir: bool) -> bool {
        let segments: Vec<&str> = relpath.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(name) = segments.last() {
            if self.excluded_names.iter().any(|n| n == name) {
                debug!(relpath, "excluded by name");
                return true;
            }
        }

        let relative = Path::new(relpath);
        for excluded in &self.excluded_paths {
            let hit = if excluded.is_absolute() {
                absolute.starts_with(excluded)
            } else {
                relative.starts_with(excluded)
            };
            if hit {
                debug!(relpath, excluded = %excluded.display(), "excluded by path");
                return true;
            }
        }

        for (raw, pattern) in self.patterns.iter().zip(&self.compiled) {
            if pattern.matches(relpath, &segments, is_dir) {
                debug!(relpath, pattern = %raw, "excluded by pattern");
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(patterns: &[&str]) -> ExclusionRules {
        let mut rules = ExclusionRules::new();
        for pattern in patterns {
            rules.add_pattern(pattern).expect("Pattern should compile");
        }
        rules
    }

    #[test]
    fn test_glob_matches_any_segment() {
        let rules = rules(&["*.tmp", "~*"]);
        let abs = Path::new("/src");
        assert!(rules.excludes_file("a.tmp", abs, 1));
        assert!(rules.excludes_file("deep/dir/b.tmp", abs, 1));
        assert!(rules.excludes_file("docs/~lock.docx", abs, 1));
        assert!(!rules.excludes_file("docs/report.txt", abs, 1));
    }

    #[test]
    fn test_trailing_slash_matches_directory_segment_only() {
        let rules = rules(&["cache/"]);
        let abs = Path::new("/src");
        assert!(rules.excludes_dir("cache", abs));
        assert!(rules.excludes_dir("app/cache", abs));
        assert!(rules.excludes_file("app/cache/blob.bin", abs, 1));
        // a file called "cache" is not a directory segment
        assert!(!rules.excludes_file("app/cache", abs, 1));
        assert!(!rules.excludes_dir("app/cache2", abs));
    }

    #[test]
    fn test_subtree_pattern() {
        let rules = rules(&["build/**"]);
        let abs = Path::new("/src");
        assert!(rules.excludes_file("build/out/app.o", abs, 1));
        assert!(rules.excludes_dir("build", abs));
        assert!(!rules.excludes_file("src/build.rs", abs, 1));
    }

    #[test]
    fn test_names_and_paths() {
        let mut rules = ExclusionRules::new();
        rules.add_excluded_name("Thumbs.db");
        rules.add_excluded_path("private");
        rules.add_excluded_path("/mnt/src/secret");

        assert!(rules.excludes_file("photos/Thumbs.db", Path::new("/mnt/src/photos/Thumbs.db"), 1));
        assert!(rules.excludes_dir("private", Path::new("/mnt/src/private")));
        assert!(rules.excludes_file("private/key.pem", Path::new("/mnt/src/private/key.pem"), 1));
        assert!(rules.excludes_file("secret/a.txt", Path::new("/mnt/src/secret/a.txt"), 1));
        assert!(!rules.excludes_file("privately.txt", Path::new("/mnt/src/privately.txt"), 1));
    }

    #[test]
    fn test_absolute_paths_rebased_onto_root() {
        let mut rules = ExclusionRules::new();
        rules.add_excluded_path("/mnt/src/secret");
        rules.add_excluded_path("/elsewhere/x");
        rules.add_excluded_path("private");

        let rebased = rules.rebased_onto(Path::new("/mnt/src"));
        // now matches under any root, including the destination
        assert!(rebased.excludes_file("secret/a.txt", Path::new("/mnt/dst/secret/a.txt"), 1));
        assert!(rebased.excludes_dir("private", Path::new("/mnt/dst/private")));
        assert!(rebased.excludes_file("x", Path::new("/elsewhere/x"), 1));
        assert!(!rebased.excludes_file("x", Path::new("/mnt/dst/x"), 1));

        assert!(!rules.excludes_file("secret/a.txt", Path::new("/mnt/dst/secret/a.txt"), 1));
    }

    #[test]
    fn test_size_bounds() {
        let mut rules = ExclusionRules::new();
        rules.add_size_limit(Some(10), Some(100));
        let abs = Path::new("/src/f");
        assert!(rules.excludes_file("f", abs, 9));
        assert!(!rules.excludes_file("f", abs, 10));
        assert!(!rules.excludes_file("f", abs, 100));
        assert!(rules.excludes_file("f", abs, 101));
    }

    #[test]
    fn test_duplicate_and_invalid_patterns() {
        let mut rules = ExclusionRules::new();
        rules.add_pattern("*.log").expect("valid");
        rules.add_pattern(" *.log ").expect("duplicate is ignored");
        rules.add_pattern("").expect("blank is ignored");
        assert_eq!(rules.patterns(), ["*.log".to_string()]);

        let err = rules.add_pattern("[unclosed").expect_err("invalid glob");
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }
}
