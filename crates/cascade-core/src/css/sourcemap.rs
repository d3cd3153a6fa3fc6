//! Line-level V3 source maps for compiled stylesheets.
//!
//! The Sass compiler does not report positions, so each output line is matched
//! back to the first source line that declares the same selector or property,
//! searching forward from the previous match.

use serde::Serialize;
use std::path::Path;

use cascade_util::path::{relative_to, to_slash};

use super::sass::LoadedSource;
use crate::project::SourceMapConfig;

/// Source map settings for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapOptions {
    pub enabled: bool,
    /// Explicit `sourceRoot`. `None` uses the source directory relative to
    /// the output directory.
    pub source_root: Option<String>,
    pub include_content: bool,
}

impl Default for SourceMapOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            source_root: None,
            include_content: true,
        }
    }
}

impl SourceMapOptions {
    /// Production never inlines source content.
    #[must_use]
    pub fn from_config(config: &SourceMapConfig, production: bool) -> Self {
        Self {
            enabled: config.enabled,
            source_root: config.source_root.clone(),
            include_content: config.include_content && !production,
        }
    }
}

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson<'a> {
    version: u8,
    file: &'a str,
    source_root: &'a str,
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources_content: Option<Vec<&'a str>>,
    names: [&'a str; 0],
    mappings: String,
}

/// Collects line mappings and serializes a V3 map.
#[derive(Debug, Default)]
struct SourceMapBuilder {
    /// `(output_line, source_idx, source_line)`, one per mapped output line.
    mappings: Vec<(u32, u32, u32)>,
}

impl SourceMapBuilder {
    fn add_line_mapping(&mut self, output_line: u32, source_idx: u32, source_line: u32) {
        self.mappings.push((output_line, source_idx, source_line));
    }

    fn encode_mappings(&self) -> String {
        let mut out = String::new();
        let mut line: u32 = 0;
        let mut prev_source: i64 = 0;
        let mut prev_source_line: i64 = 0;

        let mut sorted = self.mappings.clone();
        sorted.sort_by_key(|m| m.0);

        for (output_line, source_idx, source_line) in sorted {
            if output_line < line {
                continue;
            }
            while line < output_line {
                out.push(';');
                line += 1;
            }
            // Columns are always 0: generated column, then source column.
            vlq_encode(0, &mut out);
            vlq_encode(i64::from(source_idx) - prev_source, &mut out);
            vlq_encode(i64::from(source_line) - prev_source_line, &mut out);
            vlq_encode(0, &mut out);

            prev_source = i64::from(source_idx);
            prev_source_line = i64::from(source_line);
            line += 1;
            out.push(';');
        }

        while out.ends_with(';') {
            out.pop();
        }
        out
    }
}

/// What an output line is looking for in the sources.
#[derive(Debug, PartialEq, Eq)]
enum LineKey<'a> {
    /// `color: red;` → `color`
    Property(&'a str),
    /// `.nav .item:hover {` → `.item:hover`, `@media (…) {` → `@media (…)`
    Selector(&'a str),
}

fn line_key(line: &str) -> Option<LineKey<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('}') || trimmed.starts_with("/*") {
        return None;
    }

    if let Some(head) = trimmed.strip_suffix('{') {
        let head = head.trim_end().trim_end_matches(',');
        if head.starts_with('@') {
            return Some(LineKey::Selector(head));
        }
        let last = head
            .rsplit([' ', '>', '+', '~', ','])
            .find(|part| !part.is_empty())
            .unwrap_or(head);
        return Some(LineKey::Selector(last));
    }

    if let Some((prop, _)) = trimmed.split_once(':') {
        let prop = prop.trim();
        if !prop.is_empty() && !prop.contains(' ') && !prop.contains('{') {
            return Some(LineKey::Property(prop));
        }
    }

    // Selector list continuation (`a,` on its own line).
    let head = trimmed.trim_end_matches(',');
    head.rsplit([' ', '>', '+', '~'])
        .find(|part| !part.is_empty())
        .map(LineKey::Selector)
}

fn line_matches(source_line: &str, key: &LineKey<'_>) -> bool {
    match key {
        LineKey::Property(prop) => source_line.match_indices(prop).any(|(at, _)| {
            let before_ok = source_line[..at]
                .chars()
                .next_back()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'));
            let after = source_line[at + prop.len()..].trim_start();
            before_ok && after.starts_with(':')
        }),
        LineKey::Selector(selector) => source_line.contains(selector),
    }
}

/// Build a line-level source map for `css`.
///
/// `sources` are the compiler's loaded files (entry first); their names in the
/// map are relative to `source_dir`. `file` is the stylesheet's file name.
pub fn generate(
    css: &str,
    file: &str,
    sources: &[LoadedSource],
    source_dir: &Path,
    output_dir: &Path,
    options: &SourceMapOptions,
) -> Result<String, serde_json::Error> {
    let source_lines: Vec<Vec<&str>> = sources
        .iter()
        .map(|s| s.contents.lines().collect())
        .collect();

    let mut builder = SourceMapBuilder::default();
    // (source_idx, next line to search from)
    let mut cursor: (usize, usize) = (0, 0);

    for (output_line, line) in css.lines().enumerate() {
        let Some(key) = line_key(line) else {
            continue;
        };

        let found = find_forward(&source_lines, cursor, &key).or_else(|| find_anywhere(&source_lines, &key));
        let (source_idx, source_line) = match found {
            Some(pos) => {
                cursor = (pos.0, pos.1);
                (pos.0 as u32, pos.1 as u32)
            }
            // Unmatched lines (generated prefixes, merged rules) map to the entry's first line.
            None => (0, 0),
        };
        builder.add_line_mapping(output_line as u32, source_idx, source_line);
    }

    let source_root = match &options.source_root {
        Some(root) => root.clone(),
        None => to_slash(&relative_to(source_dir, output_dir)),
    };

    let map = SourceMapJson {
        version: 3,
        file,
        source_root: &source_root,
        sources: sources
            .iter()
            .map(|s| to_slash(&relative_to(&s.path, source_dir)))
            .collect(),
        sources_content: options
            .include_content
            .then(|| sources.iter().map(|s| s.contents.as_str()).collect()),
        names: [],
        mappings: builder.encode_mappings(),
    };

    serde_json::to_string(&map)
}

fn find_forward(lines: &[Vec<&str>], cursor: (usize, usize), key: &LineKey<'_>) -> Option<(usize, usize)> {
    let (idx, from) = cursor;
    let source = lines.get(idx)?;
    source
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| line_matches(l, key))
        .map(|(n, _)| (idx, n))
}

fn find_anywhere(lines: &[Vec<&str>], key: &LineKey<'_>) -> Option<(usize, usize)> {
    lines.iter().enumerate().find_map(|(idx, source)| {
        source
            .iter()
            .position(|l| line_matches(l, key))
            .map(|n| (idx, n))
    })
}

/// Trailing comment that points browsers at the map.
#[must_use]
pub fn mapping_url_comment(map_file_name: &str) -> String {
    format!("/*# sourceMappingURL={map_file_name} */")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn vlq(v: i64) -> String {
        let mut s = String::new();
        vlq_encode(v, &mut s);
        s
    }

    fn source(path: &str, contents: &str) -> LoadedSource {
        LoadedSource {
            path: PathBuf::from(path),
            contents: contents.to_string(),
        }
    }

    #[test]
    fn test_vlq_encode() {
        assert_eq!(vlq(0), "A");
        assert_eq!(vlq(1), "C");
        assert_eq!(vlq(-1), "D");
        assert_eq!(vlq(15), "e");
        assert_eq!(vlq(16), "gB");
    }

    #[test]
    fn test_line_key() {
        assert_eq!(line_key("  color: red;"), Some(LineKey::Property("color")));
        assert_eq!(line_key(".nav .item {"), Some(LineKey::Selector(".item")));
        assert_eq!(
            line_key("@media (min-width: 600px) {"),
            Some(LineKey::Selector("@media (min-width: 600px)"))
        );
        assert_eq!(line_key("}"), None);
        assert_eq!(line_key(""), None);
    }

    #[test]
    fn test_property_match_needs_boundary() {
        assert!(line_matches("  color: $c;", &LineKey::Property("color")));
        assert!(!line_matches("  background-color: red;", &LineKey::Property("color")));
    }

    #[test]
    fn test_generate_maps_partials() {
        let sources = vec![
            source("/site/scss/cascade.scss", "@import 'buttons';\n\nbody {\n  margin: 0;\n}\n"),
            source("/site/scss/partials/_buttons.scss", ".btn {\n  padding: 4px;\n}\n"),
        ];
        let css = ".btn {\n  padding: 4px;\n}\n\nbody {\n  margin: 0;\n}\n";

        let json = generate(
            css,
            "styles.css",
            &sources,
            Path::new("/site/scss"),
            Path::new("/site/test"),
            &SourceMapOptions::default(),
        )
        .unwrap();
        let map: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "styles.css");
        assert_eq!(map["sourceRoot"], "../scss");
        assert_eq!(
            map["sources"],
            serde_json::json!(["cascade.scss", "partials/_buttons.scss"])
        );
        assert_eq!(map["sourcesContent"][1], ".btn {\n  padding: 4px;\n}\n");
        // .btn → src 1 line 0; padding → src 1 line 1; body → src 0 line 2; margin → src 0 line 3
        assert_eq!(map["mappings"], "ACAA;AACA;;;ADCA;AACA");
    }

    #[test]
    fn test_unmatched_line_maps_to_entry_start() {
        let sources = vec![source("/p/scss/a.scss", "x\ny\n.btn {\n  padding: 1px;\n}\n")];
        let css = ".btn {\n  padding: 1px;\n  -webkit-zzz: 1;\n}\n";
        let json = generate(
            css,
            "a.css",
            &sources,
            Path::new("/p/scss"),
            Path::new("/p/out"),
            &SourceMapOptions::default(),
        )
        .unwrap();
        let map: serde_json::Value = serde_json::from_str(&json).unwrap();
        // .btn → line 2; padding → line 3; -webkit-zzz → back to line 0 (delta -3)
        assert_eq!(map["mappings"], "AAEA;AACA;AAHA");
    }

    #[test]
    fn test_generate_without_content() {
        let sources = vec![source("/p/scss/a.scss", "a { color: red; }\n")];
        let options = SourceMapOptions {
            include_content: false,
            source_root: Some("/styles".to_string()),
            ..Default::default()
        };
        let json = generate("a {\n  color: red;\n}\n", "a.css", &sources, Path::new("/p/scss"), Path::new("/p/out"), &options)
            .unwrap();
        let map: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(map.get("sourcesContent").is_none());
        assert_eq!(map["sourceRoot"], "/styles");
        assert_eq!(map["mappings"], "AAAA;AAAA");
    }

    #[test]
    fn test_from_config_production_drops_content() {
        let config = SourceMapConfig::default();
        assert!(SourceMapOptions::from_config(&config, false).include_content);
        assert!(!SourceMapOptions::from_config(&config, true).include_content);
    }

    #[test]
    fn test_mapping_url_comment() {
        assert_eq!(
            mapping_url_comment("styles.css.map"),
            "/*# sourceMappingURL=styles.css.map */"
        );
    }
}
