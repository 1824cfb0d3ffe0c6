//! A small INI-style reader/writer for [`crate::Config`].
//!
//! This is deliberately minimal: tokenizing a file into
//! `(section, key, option, value)` tuples is an out-of-scope external
//! concern; only enough is implemented here to drive the in-scope
//! `Config`/`ConfigSection` API.

use crate::config::Config;
use crate::error::{Error, Result};

enum Line<'a> {
    Section { name: &'a str, key: &'a str },
    Option { name: &'a str, value: &'a str },
    Blank,
}

fn strip_comment(line: &str) -> &str {
    let mut end = line.len();
    for (idx, c) in line.char_indices() {
        if c == '#' || c == ';' {
            end = idx;
            break;
        }
    }
    &line[..end]
}

fn parse_line(raw: &str) -> Result<Line<'_>> {
    let line = strip_comment(raw).trim();
    if line.is_empty() {
        return Ok(Line::Blank);
    }
    if let Some(rest) = line.strip_prefix('[') {
        let inner = rest.strip_suffix(']').ok_or_else(|| {
            Error::Syntax(format!("unterminated section header '{raw}'"))
        })?;
        return Ok(match inner.split_once(':') {
            Some((name, key)) => Line::Section { name: name.trim(), key: key.trim() },
            None => Line::Section { name: inner.trim(), key: "" },
        });
    }
    let sep = line
        .find(['=', ':'])
        .ok_or_else(|| Error::Syntax(format!("malformed option line '{raw}'")))?;
    let name = line[..sep].trim();
    let value = line[sep + 1..].trim();
    Ok(Line::Option { name, value })
}

/// Parses `text` into a fresh [`Config`]. `[DEFAULT]` (case-insensitive)
/// folds into the defaults section and is never returned as a named
/// section; `[DEFAULT:key]` is rejected, a keyed `[DEFAULT]` makes no
/// sense since defaults has no key. Lines before the first section header
/// are rejected.
pub fn parse(text: &str, allow_keys: bool, reserved: Vec<String>) -> Result<Config> {
    if !text.is_empty() && !text.ends_with('\n') {
        return Err(Error::Syntax("Unterminated last line".to_string()));
    }

    let mut config = Config::new(allow_keys, reserved);
    let mut current: Option<(String, String)> = None;

    let mut lines = text.lines().peekable();
    let mut saw_any_section = false;
    while let Some(raw) = lines.next() {
        match parse_line(raw)? {
            Line::Blank => continue,
            Line::Section { name, key } => {
                saw_any_section = true;
                if name.eq_ignore_ascii_case("default") {
                    if !key.is_empty() {
                        return Err(Error::BadSection(
                            "[DEFAULT] section may not carry a key".to_string(),
                        ));
                    }
                    current = None;
                } else {
                    config.add_section(name, key)?;
                    current = Some((name.to_lowercase(), key.to_string()));
                }
            }
            Line::Option { name, value } => {
                if !saw_any_section {
                    return Err(Error::Syntax(format!(
                        "option '{name}' appears before any section header"
                    )));
                }
                match &current {
                    None => config.defaults_mut().set(name, value)?,
                    Some((n, k)) => {
                        let section = config.section_mut(n, k).expect("section just inserted");
                        section.set(name, value)?;
                    }
                }
            }
        }
    }

    Ok(config)
}

/// Serializes `config` back to INI text, used for round-trip tests.
pub fn to_string(config: &Config) -> String {
    let mut out = String::new();
    out.push_str("[DEFAULT]\n");
    for (name, value) in config.defaults().iter_pairs() {
        out.push_str(&format!("{name} = {value}\n"));
    }
    for ((name, key), section) in config.iter() {
        if key.is_empty() {
            out.push_str(&format!("\n[{name}]\n"));
        } else {
            out.push_str(&format!("\n[{name}:{key}]\n"));
        }
        for (opt, value) in section.iter_pairs() {
            out.push_str(&format!("{opt} = {value}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_keys() {
        let text = "[DEFAULT]\nfoo = bar\n\n[routing:r1]\nmode = read-only\n";
        let cfg = parse(text, true, vec![]).unwrap();
        assert_eq!(cfg.get_option("routing", "r1", "mode").unwrap(), "read-only");
        assert_eq!(cfg.get_option("routing", "r1", "foo").unwrap(), "bar");
    }

    #[test]
    fn keyed_default_rejected() {
        let text = "[DEFAULT:x]\nfoo = bar\n";
        assert!(parse(text, true, vec![]).is_err());
    }

    #[test]
    fn keys_disallowed_fails() {
        let text = "[routing:r1]\nmode = read-only\n";
        assert!(parse(text, false, vec![]).is_err());
    }

    #[test]
    fn option_before_section_fails() {
        let text = "mode = read-only\n[routing]\n";
        assert!(parse(text, true, vec![]).is_err());
    }

    #[test]
    fn missing_trailing_newline_on_last_line_fails() {
        let text = "[DEFAULT]\nfoo = bar\n\n[routing:r1]\nmode = read-only";
        let err = parse(text, true, vec![]).unwrap_err();
        assert!(err.to_string().contains("Unterminated last line"));
    }

    #[test]
    fn empty_text_is_not_an_unterminated_line() {
        assert!(parse("", true, vec![]).is_ok());
    }

    #[test]
    fn round_trip_preserves_section_set() {
        let text = "[DEFAULT]\nfoo = bar\n\n[routing:r1]\nmode = read-only\n\n[metadata_cache:c1]\nuser = x\n";
        let cfg = parse(text, true, vec![]).unwrap();
        let serialized = to_string(&cfg);
        let cfg2 = parse(&serialized, true, vec![]).unwrap();

        let mut a: Vec<_> = cfg.iter().map(|(k, _)| k.clone()).collect();
        let mut b: Vec<_> = cfg2.iter().map(|(k, _)| k.clone()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
