//
// consumer.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use serde::Deserialize;

use crate::sourcemap::vlq;

/// The source-map JSON shape we care about. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    source_root: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    mappings: String,
}

/// One decoded mapping entry. All positions are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source: usize,
    pub original_line: u32,
    pub original_column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedPosition {
    pub line: u32,
    pub column: u32,
}

/// A parsed source map, queryable from original positions to generated ones.
#[derive(Debug)]
pub struct SourceMapConsumer {
    pub file: Option<String>,
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    /// In generated (parse) order; ties between equal original positions are
    /// broken by this order.
    mappings: Vec<Mapping>,
}

impl SourceMapConsumer {
    /// Parses map JSON. Maps that list no sources are rejected, there is
    /// nothing they could resolve.
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let raw: RawSourceMap = serde_json::from_str(json)?;

        if raw.sources.is_empty() {
            anyhow::bail!("source map has an empty sources list");
        }

        let mappings = decode_mappings(&raw.mappings, raw.sources.len())?;

        Ok(Self {
            file: raw.file,
            source_root: raw.source_root,
            sources: raw.sources,
            mappings,
        })
    }

    /// Every generated position whose original position sits on `line` of
    /// `source`, in consumer order.
    pub fn all_generated_positions_for(
        &self,
        source: usize,
        line: u32,
    ) -> Vec<GeneratedPosition> {
        self.mappings
            .iter()
            .filter(|m| m.source == source && m.original_line == line)
            .map(|m| GeneratedPosition {
                line: m.generated_line,
                column: m.generated_column,
            })
            .collect()
    }

    /// Nearest generated position at or after `(line, column)` of `source`.
    pub fn generated_position_for(
        &self,
        source: usize,
        line: u32,
        column: u32,
    ) -> Option<GeneratedPosition> {
        let same_line = self
            .mappings
            .iter()
            .filter(|m| m.source == source && m.original_line == line && m.original_column >= column)
            .min_by_key(|m| m.original_column);

        let candidate = same_line.or_else(|| {
            self.mappings
                .iter()
                .filter(|m| m.source == source && m.original_line > line)
                .min_by_key(|m| (m.original_line, m.original_column))
        });

        candidate.map(|m| GeneratedPosition {
            line: m.generated_line,
            column: m.generated_column,
        })
    }
}

fn decode_mappings(mappings: &str, num_sources: usize) -> anyhow::Result<Vec<Mapping>> {
    let mut out = Vec::new();

    // Running values persist across generated lines; the generated column
    // resets at each `;`.
    let mut source: i64 = 0;
    let mut original_line: i64 = 0;
    let mut original_column: i64 = 0;

    for (generated_line, line) in mappings.split(';').enumerate() {
        let mut generated_column: i64 = 0;

        for segment in line.split(',') {
            if segment.is_empty() {
                continue;
            }

            let fields = vlq::decode_segment(segment)?;
            match fields.len() {
                1 | 4 | 5 => {},
                n => anyhow::bail!("mapping segment has {n} fields"),
            }

            generated_column += fields[0];
            if fields.len() == 1 {
                // Generated-only segment, nothing to resolve back to
                continue;
            }

            source += fields[1];
            original_line += fields[2];
            original_column += fields[3];

            if source < 0 || source as usize >= num_sources {
                anyhow::bail!("mapping segment references source {source}");
            }
            if generated_column < 0 || original_line < 0 || original_column < 0 {
                anyhow::bail!("mapping segment went negative");
            }

            out.push(Mapping {
                generated_line: generated_line as u32,
                generated_column: generated_column as u32,
                source: source as usize,
                original_line: original_line as u32,
                original_column: original_column as u32,
            });
        }
    }

    Ok(out)
}
