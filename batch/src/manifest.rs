//! Song/style pairs for the render job.
//!
//! One pair per line, tab-separated: `<song>\t<style>[\t<key>]`. Paths are
//! relative to the song and style directories.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// 1-based line number in the manifest.
    pub line: usize,
    pub song: String,
    pub style: String,
    /// Key to set before generating, if any.
    pub key: Option<String>,
}

/// Parse one manifest line. Blank lines yield `None`.
pub fn parse_line(line_number: usize, line: &str) -> Result<Option<ManifestEntry>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let mut fields = line.split('\t');
    let (Some(song), Some(style)) = (fields.next(), fields.next()) else {
        bail!("line {line_number}: expected <song>\\t<style>[\\t<key>], got {line:?}");
    };
    if song.is_empty() || style.is_empty() {
        bail!("line {line_number}: song and style must not be empty");
    }
    let key = fields
        .next()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);
    Ok(Some(ManifestEntry {
        line: line_number,
        song: song.to_string(),
        style: style.to_string(),
        key,
    }))
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut entries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(entry) =
            parse_line(index + 1, line).with_context(|| format!("parse {}", path.display()))?
        {
            entries.push(entry);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pair_with_key() {
        let entry = parse_line(4, "jazz/Misty.SGU\tJAZZSWNG.STY\tEb\n")
            .expect("parse")
            .expect("entry");
        assert_eq!(entry.line, 4);
        assert_eq!(entry.song, "jazz/Misty.SGU");
        assert_eq!(entry.style, "JAZZSWNG.STY");
        assert_eq!(entry.key.as_deref(), Some("Eb"));
    }

    #[test]
    fn key_is_optional() {
        let entry = parse_line(1, "Misty.SGU\tBOSSA.STY").expect("parse").expect("entry");
        assert_eq!(entry.key, None);
        let entry = parse_line(1, "Misty.SGU\tBOSSA.STY\t").expect("parse").expect("entry");
        assert_eq!(entry.key, None);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse_line(2, "   \r\n").expect("parse"), None);
    }

    #[test]
    fn single_field_names_the_line() {
        let err = parse_line(7, "Misty.SGU").unwrap_err();
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn reads_file_with_line_numbers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pairs.tsv");
        fs::write(&path, "A.SGU\tX.STY\n\nB.SGU\tY.STY\tF\n").expect("write");

        let entries = read_manifest(&path).expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].line, 3);
        assert_eq!(entries[1].key.as_deref(), Some("F"));
    }
}
