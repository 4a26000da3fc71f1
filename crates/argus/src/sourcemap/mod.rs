//
// mod.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

pub mod consumer;
pub mod vlq;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::scanner::normalize_path;
use crate::sourcemap::consumer::SourceMapConsumer;

/// A generated-file position, 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug)]
struct MapEntry {
    output_file: String,
    map_file: String,
    consumer: Arc<SourceMapConsumer>,
    source_index: usize,
}

/// Translates original (transpiler input) positions into positions in the
/// emitted files the runtime actually loaded. Built once from the scanned
/// `.map` files and owned for the process lifetime.
#[derive(Debug, Default)]
pub struct SourceMapper {
    /// Normalized input path → owning map.
    entries: HashMap<String, MapEntry>,
}

impl SourceMapper {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ingests every map file, logging and skipping the ones that do not
    /// parse or list no sources.
    pub fn load(map_files: &[PathBuf]) -> Self {
        let mut mapper = Self::default();

        for map_file in map_files {
            if let Err(err) = mapper.ingest(map_file) {
                log::warn!("Skipping source map {}: {err}", map_file.display());
            }
        }

        log::info!(
            "Loaded source maps for {} input files",
            mapper.entries.len()
        );
        mapper
    }

    fn ingest(&mut self, map_file: &Path) -> anyhow::Result<()> {
        let contents = std::fs::read_to_string(map_file)?;
        let consumer = Arc::new(SourceMapConsumer::parse(&contents)?);

        let map_dir = map_file.parent().unwrap_or_else(|| Path::new(""));
        let map_file_str = normalize_path(&map_file.to_string_lossy());

        // The output file is either declared by the map or derived from the
        // map's own name minus the `.map` suffix, resolved next to the map.
        let output_name = match &consumer.file {
            Some(file) => file.clone(),
            None => {
                let base = map_file
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                base.strip_suffix(".map").unwrap_or(&base).to_string()
            },
        };
        let output_file = normalize_lexically(&normalize_path(
            &map_dir.join(&output_name).to_string_lossy(),
        ));

        for (source_index, source) in consumer.sources.iter().enumerate() {
            let mut source_path = PathBuf::from(map_dir);
            if let Some(root) = &consumer.source_root {
                source_path.push(root);
            }
            source_path.push(source);

            let key = normalize_lexically(&normalize_path(&source_path.to_string_lossy()));

            self.entries.insert(key, MapEntry {
                output_file: output_file.clone(),
                map_file: map_file_str.clone(),
                consumer: consumer.clone(),
                source_index,
            });
        }

        Ok(())
    }

    pub fn has_mapping_info(&self, input_path: &str) -> bool {
        self.lookup(input_path).is_some()
    }

    /// Translates `(input_path, line, column)` to the generated file.
    ///
    /// Of all generated positions for the input line, the one with the
    /// smallest generated line wins, ties broken by consumer order; when the
    /// line has no direct mapping we fall back to the nearest following
    /// original position. Returns None when the input file has no map or the
    /// map cannot place the position at all.
    pub fn mapping_info(&self, input_path: &str, line: u32, column: u32) -> Option<MappedPosition> {
        let entry = self.lookup(input_path)?;

        let positions = entry
            .consumer
            .all_generated_positions_for(entry.source_index, line);

        let position = positions
            .iter()
            .min_by_key(|p| p.line)
            .copied()
            .or_else(|| {
                entry
                    .consumer
                    .generated_position_for(entry.source_index, line, column)
            })?;

        Some(MappedPosition {
            file: entry.output_file.clone(),
            line: position.line,
            column: position.column,
        })
    }

    pub fn map_file_for(&self, input_path: &str) -> Option<&str> {
        self.lookup(input_path).map(|entry| entry.map_file.as_str())
    }

    fn lookup(&self, input_path: &str) -> Option<&MapEntry> {
        let input = normalize_lexically(&normalize_path(input_path));

        if let Some(entry) = self.entries.get(&input) {
            return Some(entry);
        }

        // Tolerate partial hints the way the scanner does: accept a unique
        // entry whose path ends with the hint on a component boundary.
        let mut matches = self.entries.iter().filter(|(key, _)| {
            key.len() > input.len()
                && key.ends_with(&input)
                && key.as_bytes()[key.len() - input.len() - 1] == b'/'
        });

        let (_, entry) = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(entry),
        }
    }
}

/// Collapses `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                if matches!(parts.last(), Some(&last) if last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            },
            part => parts.push(part),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_map(dir: &Path, rel: &str, json: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically("/a/./b/../c.ts"), "/a/c.ts");
        assert_eq!(normalize_lexically("a/../../b"), "../b");
        assert_eq!(normalize_lexically("./src/app.ts"), "src/app.ts");
    }

    #[test]
    fn test_load_builds_input_index() {
        let dir = tempfile::tempdir().unwrap();
        let map = write_map(
            dir.path(),
            "out/app.js.map",
            r#"{"version": 3, "file": "app.js", "sources": ["../src/app.ts"], "mappings": "AAAA"}"#,
        );

        let mapper = SourceMapper::load(&[map]);
        let input = format!("{}/src/app.ts", normalize_path(&dir.path().to_string_lossy()));
        assert!(mapper.has_mapping_info(&input));

        let position = mapper.mapping_info(&input, 0, 0).unwrap();
        assert!(position.file.ends_with("out/app.js"));
        assert_eq!(position.line, 0);
    }

    #[test]
    fn test_output_file_derived_from_map_name() {
        let dir = tempfile::tempdir().unwrap();
        let map = write_map(
            dir.path(),
            "dist/bundle.js.map",
            r#"{"version": 3, "sources": ["index.ts"], "mappings": "AAAA"}"#,
        );

        let mapper = SourceMapper::load(&[map]);
        let input = format!(
            "{}/dist/index.ts",
            normalize_path(&dir.path().to_string_lossy())
        );
        let position = mapper.mapping_info(&input, 0, 0).unwrap();
        assert!(position.file.ends_with("dist/bundle.js"));
    }

    #[test]
    fn test_empty_sources_map_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let map = write_map(
            dir.path(),
            "out/bad.js.map",
            r#"{"version": 3, "sources": [], "mappings": ""}"#,
        );

        let mapper = SourceMapper::load(&[map]);
        assert!(!mapper.has_mapping_info("bad.ts"));
    }

    #[test]
    fn test_suffix_lookup_tolerates_partial_hints() {
        let dir = tempfile::tempdir().unwrap();
        let map = write_map(
            dir.path(),
            "out/app.js.map",
            r#"{"version": 3, "file": "app.js", "sources": ["../src/app.ts"], "mappings": "AAAA"}"#,
        );

        let mapper = SourceMapper::load(&[map]);
        assert!(mapper.has_mapping_info("src/app.ts"));
        assert!(!mapper.has_mapping_info("elsewhere.ts"));
    }

    #[test]
    fn test_smallest_generated_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        // Input line 0 maps twice: generated line 2 col 0 and line 0 col 4.
        // "AAAA" would be (0,0); instead: line0 has "IAAA" (col 4, src line 0),
        // line2 has "AAAA" (col 0, src line 0).
        let map = write_map(
            dir.path(),
            "out/app.js.map",
            r#"{"version": 3, "file": "app.js", "sources": ["app.ts"], "mappings": "IAAA;;AAAA"}"#,
        );

        let mapper = SourceMapper::load(&[map]);
        let input = format!(
            "{}/out/app.ts",
            normalize_path(&dir.path().to_string_lossy())
        );
        let position = mapper.mapping_info(&input, 0, 0).unwrap();
        assert_eq!(position.line, 0);
        assert_eq!(position.column, 4);
    }
}
