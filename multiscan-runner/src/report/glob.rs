// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::ReportSpec;
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

/// Finds the artifacts of one report format below a directory.
#[derive(Clone, Debug)]
pub struct ArtifactGlob {
    pattern: String,
    matcher: GlobMatcher,
}

impl ArtifactGlob {
    /// Compiles the pattern for `spec`.
    pub fn new(spec: &ReportSpec) -> Result<Self, globset::Error> {
        Self::from_pattern(spec.glob_pattern())
    }

    /// Compiles an arbitrary pattern, relative to the directory being searched.
    pub fn from_pattern(pattern: impl Into<String>) -> Result<Self, globset::Error> {
        let pattern = pattern.into();
        let matcher = GlobBuilder::new(&pattern)
            // `*` shouldn't match across directories.
            .literal_separator(true)
            // Only allow escapes via [].
            .backslash_escape(false)
            .build()?
            .compile_matcher();
        Ok(Self { pattern, matcher })
    }

    /// Returns the pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns every path below `dir` that matches, sorted.
    ///
    /// Matching directories (such as result bundles) are returned without descending into them.
    /// A missing directory has no matches.
    pub fn find(&self, dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut found = Vec::new();
        let mut walker = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(%dir, pattern = %self.pattern, "skipping unreadable entry: {error}");
                    continue;
                }
            };
            let Ok(path) = Utf8PathBuf::try_from(entry.path().to_path_buf()) else {
                debug!(path = ?entry.path(), "skipping non-UTF-8 path");
                continue;
            };
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };

            if self.matcher.is_match(relative) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                found.push(path);
            }
        }

        debug!(%dir, pattern = %self.pattern, matches = found.len(), "looked up artifacts");
        found.sort();
        found
    }
}
