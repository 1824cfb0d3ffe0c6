use crate::error::{Error, Result};
use crate::section::ConfigSection;
use std::collections::BTreeMap;

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let candidate = candidate.to_lowercase();
    match pattern.split_once('*') {
        None => pattern == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}

fn is_legal_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A mapping from `(section-name, section-key)` to a [`ConfigSection`],
/// plus a shared defaults section every lookup falls through to.
///
/// The empty key denotes a key-less section. `reserved` holds glob
/// patterns (`*` wildcard) that no section name may match.
#[derive(Debug, Clone)]
pub struct Config {
    defaults: ConfigSection,
    sections: BTreeMap<(String, String), ConfigSection>,
    reserved: Vec<String>,
    allow_keys: bool,
}

impl Config {
    pub fn new(allow_keys: bool, reserved: Vec<String>) -> Self {
        Self {
            defaults: ConfigSection::new("default", ""),
            sections: BTreeMap::new(),
            reserved,
            allow_keys,
        }
    }

    pub fn allow_keys(&self) -> bool {
        self.allow_keys
    }

    pub fn defaults(&self) -> &ConfigSection {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut ConfigSection {
        &mut self.defaults
    }

    /// "no named sections" — defaults do not count.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, name: &str, key: &str) -> Option<&ConfigSection> {
        self.sections.get(&(name.to_lowercase(), key.to_string()))
    }

    pub fn section_mut(&mut self, name: &str, key: &str) -> Option<&mut ConfigSection> {
        self.sections.get_mut(&(name.to_lowercase(), key.to_string()))
    }

    /// Every section whose name equals `name` (across all keys).
    pub fn sections_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigSection> {
        let name = name.to_lowercase();
        self.sections
            .iter()
            .filter(move |((n, _), _)| *n == name)
            .map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &ConfigSection)> {
        self.sections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConfigSection> {
        self.sections.values_mut()
    }

    fn check_name_key(&self, name: &str, key: &str) -> Result<()> {
        if !is_legal_identifier(name) {
            return Err(Error::BadSection(format!("illegal section name '{name}'")));
        }
        if !key.is_empty() {
            if !self.allow_keys {
                return Err(Error::BadSection(format!(
                    "section '{name}' has a key but this configuration does not allow keys"
                )));
            }
            if !is_legal_identifier(key) {
                return Err(Error::BadSection(format!("illegal section key '{key}'")));
            }
        }
        if self.reserved.iter().any(|pat| glob_match(pat, name)) {
            return Err(Error::BadSection(format!(
                "section name '{name}' matches a reserved name pattern"
            )));
        }
        Ok(())
    }

    /// Inserts a new, empty section. Fails on illegal names/keys, reserved
    /// names, or a duplicate `(name, key)`.
    pub fn add_section(&mut self, name: &str, key: &str) -> Result<&mut ConfigSection> {
        self.check_name_key(name, key)?;
        let map_key = (name.to_lowercase(), key.to_string());
        if self.sections.contains_key(&map_key) {
            return Err(Error::BadSection(format!(
                "duplicate section [{name}{}]",
                if key.is_empty() { String::new() } else { format!(":{key}") }
            )));
        }
        let section = ConfigSection::new(name, key);
        Ok(self.sections.entry(map_key).or_insert(section))
    }

    pub fn get_option(&self, name: &str, key: &str, option: &str) -> Result<String> {
        let section = self.section(name, key).ok_or_else(|| {
            Error::BadSection(format!(
                "no such section [{name}{}]",
                if key.is_empty() { String::new() } else { format!(":{key}") }
            ))
        })?;
        section.get(option, Some(&self.defaults))
    }

    /// For each section in `other` absent from `self`, clones it in. For
    /// each present, merges options (`other` wins). Finally merges the two
    /// defaults sections.
    pub fn update(&mut self, other: &Config) -> Result<()> {
        for (map_key, other_section) in &other.sections {
            match self.sections.get_mut(map_key) {
                Some(existing) => existing.merge_from(other_section),
                None => {
                    self.check_name_key(&map_key.0, &map_key.1)?;
                    self.sections.insert(map_key.clone(), other_section.clone());
                }
            }
        }
        self.defaults.merge_from(&other.defaults);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ignores_defaults() {
        let mut cfg = Config::new(true, vec![]);
        cfg.defaults_mut().set("x", "y").unwrap();
        assert!(cfg.is_empty());
        cfg.add_section("routing", "a").unwrap();
        assert!(!cfg.is_empty());
    }

    #[test]
    fn duplicate_section_rejected() {
        let mut cfg = Config::new(true, vec![]);
        cfg.add_section("routing", "a").unwrap();
        assert!(cfg.add_section("routing", "a").is_err());
    }

    #[test]
    fn keys_disallowed_when_flag_off() {
        let mut cfg = Config::new(false, vec![]);
        assert!(cfg.add_section("routing", "a").is_err());
        assert!(cfg.add_section("routing", "").is_ok());
    }

    #[test]
    fn reserved_glob_rejected() {
        let mut cfg = Config::new(true, vec!["default*".to_string()]);
        assert!(cfg.add_section("defaults_extra", "").is_err());
    }

    #[test]
    fn update_merges_sections_other_wins() {
        let mut a = Config::new(true, vec![]);
        a.add_section("routing", "r1").unwrap().set("mode", "read-only").unwrap();
        let mut b = Config::new(true, vec![]);
        b.add_section("routing", "r1").unwrap().set("mode", "read-write").unwrap();
        b.add_section("metadata_cache", "c1").unwrap();
        a.update(&b).unwrap();
        assert_eq!(a.get_option("routing", "r1", "mode").unwrap(), "read-write");
        assert!(a.section("metadata_cache", "c1").is_some());
    }
}
