//! Output file names.

/// Strip the extension of the last path component, keeping any directories.
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind(['/', '\\']).map_or(0, |sep| sep + 1);
    match path[name_start..].rfind('.') {
        Some(0) | None => path,
        Some(dot) => &path[..name_start + dot],
    }
}

fn file_stem(path: &str) -> &str {
    let stripped = strip_extension(path);
    stripped
        .rfind(['/', '\\'])
        .map_or(stripped, |sep| &stripped[sep + 1..])
}

/// `{song}.{style}[.{suffix}].mid`.
///
/// Directories in `song` are kept so the output tree mirrors the song tree;
/// only the file stem of `style` is used.
pub fn render_output_name(song: &str, style: &str, suffix: Option<&str>) -> String {
    let mut name = format!("{}.{}", strip_extension(song), file_stem(style));
    if let Some(suffix) = suffix.filter(|suffix| !suffix.is_empty()) {
        name.push('.');
        name.push_str(suffix);
    }
    name.push_str(".mid");
    name
}

/// Band-in-a-Box song file written for an ABC input.
pub fn sgu_output_name(input: &str) -> String {
    format!("{}.SGU", file_stem(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_name_keeps_song_directories() {
        assert_eq!(
            render_output_name("jazz/Misty.SGU", "styles/JAZZSWNG.STY", None),
            "jazz/Misty.JAZZSWNG.mid"
        );
    }

    #[test]
    fn render_name_appends_suffix() {
        assert_eq!(
            render_output_name("Misty.MGU", "BOSSA.STY", Some("v2")),
            "Misty.BOSSA.v2.mid"
        );
        assert_eq!(render_output_name("Misty.MGU", "BOSSA.STY", Some("")), "Misty.BOSSA.mid");
    }

    #[test]
    fn dotted_directories_are_not_extensions() {
        assert_eq!(render_output_name("v1.2/Misty", "BOSSA", None), "v1.2/Misty.BOSSA.mid");
    }

    #[test]
    fn abc_becomes_sgu() {
        assert_eq!(sgu_output_name("tune_0042.abc"), "tune_0042.SGU");
    }
}
