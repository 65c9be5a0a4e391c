//! File names derived from source paths.

/// Screenshot file name for a song: path separators become `_`, plus `.png`.
pub fn screenshot_file_name(source: &str) -> String {
    let mut name: String = source
        .chars()
        .map(|ch| if ch == '/' || ch == '\\' { '_' } else { ch })
        .collect();
    name.push_str(".png");
    name
}
