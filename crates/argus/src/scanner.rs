//
// scanner.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use regex::Regex;
use walkdir::DirEntry;
use walkdir::WalkDir;

/// Per-file facts recorded during the scan. The hash is a content digest
/// used to detect version skew between deployed code and the Controller's
/// view of the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub hash: String,
    pub line_count: usize,
}

/// One-shot index of the working directory.
///
/// Built once at startup and owned for the process lifetime. Keys are
/// normalized absolute paths with `/` separators on every platform.
#[derive(Debug, Default)]
pub struct FileScanner {
    base: PathBuf,
    stats: HashMap<String, FileStats>,
    maps: Vec<String>,
}

/// Replaces platform separators so hints and scanned paths compare equal.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn filter_entry(entry: &DirEntry) -> bool {
    // The filter also sees the walk root, which must always pass
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !(name == "node_modules" || name.starts_with('.'))
}

impl FileScanner {
    /// Walks `base` recursively, recording stats for every file matching
    /// `file_re` and the path of every file matching `map_re`.
    pub fn scan(base: &Path, file_re: &Regex, map_re: &Regex) -> anyhow::Result<Self> {
        let now = std::time::Instant::now();
        let base = base.canonicalize()?;

        let mut stats = HashMap::new();
        let mut maps = Vec::new();

        let walker = WalkDir::new(&base);
        for entry in walker.into_iter().filter_entry(filter_entry) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Can't scan directory entry: {err}");
                    continue;
                },
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = normalize_path(&entry.path().to_string_lossy());

            if map_re.is_match(&path) {
                maps.push(path);
                continue;
            }
            if !file_re.is_match(&path) {
                continue;
            }

            match std::fs::read(entry.path()) {
                Ok(contents) => {
                    let hash = blake3::hash(&contents).to_hex().to_string();
                    let line_count = contents.iter().filter(|b| **b == b'\n').count()
                        + usize::from(!contents.is_empty() && !contents.ends_with(b"\n"));
                    stats.insert(path, FileStats { hash, line_count });
                },
                Err(err) => {
                    log::warn!("Can't read {path}: {err}");
                },
            }
        }

        log::info!(
            "Scanned {} source files and {} source maps in {}ms",
            stats.len(),
            maps.len(),
            now.elapsed().as_millis()
        );

        Ok(Self { base, stats, maps })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn stats(&self, path: &str) -> Option<&FileStats> {
        self.stats.get(&normalize_path(path))
    }

    /// All recorded stats whose path matches `re`.
    pub fn select_stats(&self, re: &Regex) -> HashMap<&str, &FileStats> {
        self.stats
            .iter()
            .filter(|(path, _)| re.is_match(path))
            .map(|(path, stats)| (path.as_str(), stats))
            .collect()
    }

    /// All recorded paths (sources and maps) matching `re`.
    pub fn select_files(&self, re: &Regex) -> Vec<PathBuf> {
        self.stats
            .keys()
            .chain(self.maps.iter())
            .filter(|path| re.is_match(path))
            .map(PathBuf::from)
            .collect()
    }

    /// Stable digest over every scanned file hash, in path order. Feeds the
    /// debuggee uniquifier.
    pub fn content_digest(&self) -> Option<String> {
        if self.stats.is_empty() {
            return None;
        }

        let mut paths: Vec<&String> = self.stats.keys().collect();
        paths.sort();

        let mut hasher = blake3::Hasher::new();
        for path in paths {
            hasher.update(path.as_bytes());
            hasher.update(self.stats[path].hash.as_bytes());
        }
        Some(hasher.finalize().to_hex().to_string())
    }

    /// Resolves a possibly-partial path hint to scanned source files.
    ///
    /// Tries, in order: rebase under `app_path` when the hint is rooted
    /// there, exact path-suffix matches, then a unique-basename match.
    /// Returns an empty vector when nothing (or nothing unambiguous at the
    /// basename level) matches; two or more entries when several files share
    /// the exact suffix.
    pub fn find_scripts(&self, path_hint: &str, app_path: Option<&str>) -> Vec<String> {
        let mut hint = normalize_path(path_hint);

        if let Some(app_path) = app_path {
            let app_path = normalize_path(app_path);
            if let Some(rest) = strip_dir_prefix(&hint, &app_path) {
                hint = normalize_path(&self.base.join(rest).to_string_lossy());
            }
        }

        let files: Vec<&str> = self.stats.keys().map(String::as_str).collect();
        find_scripts_fuzzy(&hint, &files)
    }
}

fn strip_dir_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    rest.strip_prefix('/')
}

/// Suffix-based disambiguation over an arbitrary file list.
///
/// The hint is matched as a literal path suffix on a component boundary (a
/// `.` in the hint is never a regex metacharacter because no regex is
/// involved). When no suffix matches, falls back to files whose basename
/// equals the hint's basename, but only when a single file carries that
/// basename.
pub fn find_scripts_fuzzy(path_hint: &str, files: &[&str]) -> Vec<String> {
    let hint = normalize_path(path_hint);
    if hint.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<String> = files
        .iter()
        .filter(|file| {
            *file == &hint
                || (file.len() > hint.len()
                    && file.ends_with(&hint)
                    && file.as_bytes()[file.len() - hint.len() - 1] == b'/')
        })
        .map(|file| file.to_string())
        .collect();

    if !matches.is_empty() {
        matches.sort();
        return matches;
    }

    let basename = hint.rsplit('/').next().unwrap_or(&hint);
    let mut by_basename: Vec<String> = files
        .iter()
        .filter(|file| file.rsplit('/').next() == Some(basename))
        .map(|file| file.to_string())
        .collect();

    match by_basename.len() {
        1 => by_basename.drain(..).collect(),
        // None, or ambiguous across the file set
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn scan(root: &Path) -> FileScanner {
        FileScanner::scan(
            root,
            &Regex::new(r"\.js$").unwrap(),
            &Regex::new(r"\.map$").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_scan_records_hash_and_line_count() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app/foo.js", "line one\nline two\nline three");
        write(dir.path(), "app/bar.js", "only\n");
        write(dir.path(), "readme.txt", "not scanned");

        let scanner = scan(dir.path());
        let stats = scanner.select_stats(&Regex::new(r"\.js$").unwrap());
        assert_eq!(stats.len(), 2);

        let foo = stats
            .iter()
            .find(|(path, _)| path.ends_with("foo.js"))
            .unwrap()
            .1;
        assert_eq!(foo.line_count, 3);
        assert_eq!(foo.hash.len(), 64);
    }

    #[test]
    fn test_scan_separates_maps_from_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "out/app.js", "x\n");
        write(dir.path(), "out/app.js.map", "{}");

        let scanner = scan(dir.path());
        let maps = scanner.select_files(&Regex::new(r"\.map$").unwrap());
        assert_eq!(maps.len(), 1);
        assert!(scanner
            .stats(&maps[0].to_string_lossy())
            .is_none());
    }

    #[test]
    fn test_find_scripts_fuzzy_suffix() {
        let files = ["/srv/app/lib/foo.js", "/srv/app/foo.js", "/srv/app/bar.js"];

        let found = find_scripts_fuzzy("lib/foo.js", &files);
        assert_eq!(found, vec!["/srv/app/lib/foo.js"]);

        // Two files end with the same suffix
        let found = find_scripts_fuzzy("foo.js", &files);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_find_scripts_fuzzy_component_boundary() {
        let files = ["/srv/app/xfoo.js"];
        assert!(find_scripts_fuzzy("foo.js", &files).is_empty());
    }

    #[test]
    fn test_find_scripts_fuzzy_dot_is_literal() {
        // A regex-metachar reading of `.` would match this file
        let files = ["/srv/app/fooXjs"];
        assert!(find_scripts_fuzzy("foo.js", &files).is_empty());
    }

    #[test]
    fn test_find_scripts_fuzzy_unique_basename() {
        let files = ["/srv/app/lib/util.js", "/srv/app/index.js"];

        let found = find_scripts_fuzzy("dist/util.js", &files);
        assert_eq!(found, vec!["/srv/app/lib/util.js"]);
    }

    #[test]
    fn test_find_scripts_fuzzy_ambiguous_basename_is_empty() {
        let files = ["/srv/a/util.js", "/srv/b/util.js"];
        assert!(find_scripts_fuzzy("dist/util.js", &files).is_empty());
    }

    #[test]
    fn test_find_scripts_rebases_app_path() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "server/index.js", "x\n");

        let scanner = scan(dir.path());
        let found =
            scanner.find_scripts("webapp/server/index.js", Some("webapp"));
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("server/index.js"));
    }

    #[test]
    fn test_content_digest_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.js", "a\n");
        write(dir.path(), "b.js", "b\n");

        let first = scan(dir.path()).content_digest().unwrap();
        let second = scan(dir.path()).content_digest().unwrap();
        assert_eq!(first, second);
    }
}
