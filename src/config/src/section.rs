use crate::error::{Error, Result};
use std::collections::HashMap;

fn is_legal_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A single configuration section: a case-insensitive option map with a
/// fallback to the owning [`crate::Config`]'s defaults section.
///
/// Rather than the source's raw back-pointer to the owning `Config`'s
/// defaults (re-stitched by hand after every `update`), every lookup that
/// needs defaults is handed the defaults section explicitly by the caller
/// (always `Config`). This makes "every section's defaults reference
/// points to the owning Config's defaults" true by construction instead of
/// by invariant-maintenance.
#[derive(Debug, Clone, Default)]
pub struct ConfigSection {
    pub name: String,
    pub key: String,
    options: HashMap<String, String>,
}

impl ConfigSection {
    pub fn new(name: &str, key: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            key: key.to_string(),
            options: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.options.clear();
    }

    pub fn has(&self, option: &str) -> bool {
        self.options.contains_key(&option.to_lowercase())
    }

    fn raw(&self, option: &str) -> Option<&str> {
        self.options.get(&option.to_lowercase()).map(String::as_str)
    }

    /// Raw, non-interpolated `(option, value)` pairs, for serialization.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overwrites the option, creating it if absent.
    pub fn set(&mut self, option: &str, value: &str) -> Result<()> {
        if !is_legal_identifier(option) {
            return Err(Error::BadOption(format!("illegal option name '{option}'")));
        }
        self.options.insert(option.to_lowercase(), value.to_string());
        Ok(())
    }

    /// Fails if the option already exists.
    pub fn add(&mut self, option: &str, value: &str) -> Result<()> {
        if !is_legal_identifier(option) {
            return Err(Error::BadOption(format!("illegal option name '{option}'")));
        }
        let key = option.to_lowercase();
        if self.options.contains_key(&key) {
            return Err(Error::BadOption(format!(
                "option '{option}' already exists in section [{}{}]",
                self.name,
                if self.key.is_empty() { String::new() } else { format!(":{}", self.key) }
            )));
        }
        self.options.insert(key, value.to_string());
        Ok(())
    }

    /// Merges `other`'s options into `self`, `other` winning on conflicts.
    /// Section name/key are expected to already match; callers enforce that.
    pub fn merge_from(&mut self, other: &ConfigSection) {
        for (k, v) in &other.options {
            self.options.insert(k.clone(), v.clone());
        }
    }

    /// Case-insensitive lookup falling through to `defaults`, expanding
    /// every `%(name)s` occurrence in the resolved value.
    pub fn get(&self, option: &str, defaults: Option<&ConfigSection>) -> Result<String> {
        let raw = self.resolve_raw(option, defaults).ok_or_else(|| {
            Error::BadOption(format!("option '{option}' not found in section [{}]", self.name))
        })?;
        self.interpolate(&raw, defaults, 0)
    }

    fn resolve_raw(&self, option: &str, defaults: Option<&ConfigSection>) -> Option<String> {
        self.raw(option)
            .map(str::to_string)
            .or_else(|| defaults.and_then(|d| d.raw(option)).map(str::to_string))
    }

    fn interpolate(&self, value: &str, defaults: Option<&ConfigSection>, depth: u32) -> Result<String> {
        if depth > 16 {
            return Err(Error::Syntax(format!(
                "interpolation too deeply nested while expanding '{value}'"
            )));
        }
        let mut out = String::new();
        let mut rest = value;
        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find(")s").ok_or_else(|| {
                Error::Syntax(format!("unterminated interpolation in '{value}'"))
            })?;
            let name = &after[..end];
            let resolved = self.resolve_raw(name, defaults).ok_or_else(|| {
                Error::Syntax(format!("interpolation references unknown option '{name}'"))
            })?;
            out.push_str(&self.interpolate(&resolved, defaults, depth + 1)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites() {
        let mut s = ConfigSection::new("routing", "a");
        s.set("mode", "read-only").unwrap();
        s.set("mode", "read-write").unwrap();
        assert_eq!(s.get("mode", None).unwrap(), "read-write");
    }

    #[test]
    fn add_after_set_fails() {
        let mut s = ConfigSection::new("routing", "a");
        s.set("mode", "read-only").unwrap();
        assert!(s.add("mode", "read-write").is_err());
    }

    #[test]
    fn interpolation_expands_against_defaults() {
        let mut defaults = ConfigSection::new("DEFAULT", "");
        defaults.set("one", "b").unwrap();
        defaults.set("two", "r").unwrap();
        let mut section = ConfigSection::new("one", "");
        section.set("foo", "%(one)sa%(two)s").unwrap();
        assert_eq!(section.get("foo", Some(&defaults)).unwrap(), "bar");
    }

    #[test]
    fn unterminated_interpolation_is_syntax_error() {
        let mut section = ConfigSection::new("one", "");
        section.set("foo", "%(one").unwrap();
        let err = section.get("foo", None);
        assert!(err.is_err());
    }
}
