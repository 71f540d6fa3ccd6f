//! Layered configuration: an optional config file supplies defaults, the
//! command line always wins. Config-file parsing is deliberately simple — it
//! is a collaborator to the protocol engine, not part of it.

use std::path::PathBuf;

/// Locate `<config-dir>/drop/<file_name>` using the `$XDG_CONFIG_HOME`
/// convention, falling back to `$HOME/.config`. Returns `None` if neither
/// environment variable is set.
pub fn config_file_path(file_name: &str) -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("drop").join(file_name))
}

/// Read `path` if it exists and shell-word-split every non-comment,
/// non-blank line into argv-style fragments, concatenated in file order.
/// Returns an empty vector (not an error) if the file is absent — a missing
/// config file is the common case, not a failure.
pub fn read_config_args(path: &std::path::Path) -> std::io::Result<Vec<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut args = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        args.extend(split_words(line));
    }
    Ok(args)
}

/// A small shell-word splitter: whitespace-separated words, with
/// single/double quoting and backslash escapes so values like
/// `-d "my files"` survive round-tripping through a config line. This does
/// not invoke a shell — it is a re-interpretation of the line as argv
/// fragments.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_word = true;
                while let Some(c) = chars.next() {
                    if c == '"' {
                        break;
                    }
                    if c == '\\' {
                        if let Some(&next) = chars.peek() {
                            if next == '"' || next == '\\' {
                                current.push(chars.next().unwrap());
                                continue;
                            }
                        }
                    }
                    current.push(c);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_words() {
        assert_eq!(split_words("-p 69 -v"), vec!["-p", "69", "-v"]);
    }

    #[test]
    fn splits_quoted_words_with_spaces() {
        assert_eq!(
            split_words(r#"-d "my files""#),
            vec!["-d", "my files"]
        );
    }

    #[test]
    fn ignores_comment_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.conf");
        std::fs::write(&path, "# a comment\n\n-p 6969\n").unwrap();
        let args = read_config_args(&path).unwrap();
        assert_eq!(args, vec!["-p", "6969"]);
    }

    #[test]
    fn missing_file_yields_no_args() {
        let dir = tempfile::tempdir().unwrap();
        let args = read_config_args(&dir.path().join("absent.conf")).unwrap();
        assert!(args.is_empty());
    }
}
