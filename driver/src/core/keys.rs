//! Keystroke sequences in the `{HOME}p` notation used by batch jobs.
//!
//! Braced names are special keys, optionally followed by a repeat count
//! (`{DOWN 8}`); every other character is typed literally. `{{}` and `{}}`
//! type the braces themselves.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    Escape,
    Home,
    End,
    Up,
    Down,
    Left,
    Right,
    Char(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeySequenceError {
    #[error("unknown key {{{0}}}")]
    UnknownKey(String),
    #[error("unterminated key name starting at offset {0}")]
    Unterminated(usize),
    #[error("invalid repeat count in {{{0}}}")]
    BadRepeat(String),
}

fn named_key(name: &str) -> Option<Key> {
    let key = match name.to_ascii_uppercase().as_str() {
        "ENTER" => Key::Enter,
        "TAB" => Key::Tab,
        "ESC" | "ESCAPE" => Key::Escape,
        "HOME" => Key::Home,
        "END" => Key::End,
        "UP" => Key::Up,
        "DOWN" => Key::Down,
        "LEFT" => Key::Left,
        "RIGHT" => Key::Right,
        _ => return None,
    };
    Some(key)
}

/// Parse a key sequence into individual keystrokes.
pub fn parse_keys(sequence: &str) -> Result<Vec<Key>, KeySequenceError> {
    let mut keys = Vec::new();
    let mut rest = sequence;
    let mut offset = 0usize;
    while let Some(ch) = rest.chars().next() {
        if ch != '{' {
            keys.push(Key::Char(ch));
            rest = &rest[ch.len_utf8()..];
            offset += ch.len_utf8();
            continue;
        }
        // A brace literal is the only token whose body is a brace.
        let body_end = match rest[1..].find('}') {
            Some(0) if rest[1..].starts_with("}}") => 1,
            Some(pos) => pos,
            None => return Err(KeySequenceError::Unterminated(offset)),
        };
        let body = &rest[1..1 + body_end];
        let consumed = body_end + 2;
        if body == "{" || body == "}" {
            keys.push(Key::Char(body.chars().next().unwrap_or('{')));
        } else {
            let mut parts = body.split_whitespace();
            let name = parts.next().unwrap_or_default();
            let key = named_key(name).ok_or_else(|| KeySequenceError::UnknownKey(body.to_string()))?;
            let count = match parts.next() {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| KeySequenceError::BadRepeat(body.to_string()))?,
                None => 1,
            };
            if parts.next().is_some() {
                return Err(KeySequenceError::BadRepeat(body.to_string()));
            }
            keys.extend(std::iter::repeat_n(key, count));
        }
        rest = &rest[consumed..];
        offset += consumed;
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_literal_keys() {
        let keys = parse_keys("{HOME}p").expect("parse");
        assert_eq!(keys, vec![Key::Home, Key::Char('p')]);
    }

    #[test]
    fn repeated_down_then_literals() {
        let keys = parse_keys("{DOWN 8}pp").expect("parse");
        assert_eq!(keys.len(), 10);
        assert!(keys[..8].iter().all(|key| *key == Key::Down));
        assert_eq!(&keys[8..], &[Key::Char('p'), Key::Char('p')]);
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(parse_keys("{enter}").expect("parse"), vec![Key::Enter]);
    }

    #[test]
    fn brace_literals() {
        assert_eq!(
            parse_keys("{{}{}}").expect("parse"),
            vec![Key::Char('{'), Key::Char('}')]
        );
    }

    #[test]
    fn rejects_unknown_and_unterminated() {
        assert_eq!(
            parse_keys("{F13}"),
            Err(KeySequenceError::UnknownKey("F13".to_string()))
        );
        assert_eq!(parse_keys("ab{DOWN"), Err(KeySequenceError::Unterminated(2)));
        assert_eq!(
            parse_keys("{DOWN x}"),
            Err(KeySequenceError::BadRepeat("DOWN x".to_string()))
        );
    }
}
