//! On-disk config file grammar (§6): INI-like, `[section]` headers,
//! `key = value` lines (optionally `key@scope = value`), `#` comments,
//! indented continuation lines, UTF-8.

use crate::error::ConfigError;

/// One `key[@scope]` paired with its raw string value, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    pub scope: Option<String>,
    pub value: String,
}

/// One `[section]` body, in file order, sections may repeat (later entries
/// override earlier ones at the same key+scope; callers decide the policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub name: String,
    pub entries: Vec<RawEntry>,
}

/// A fully parsed file: ordered list of sections, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub sections: Vec<RawSection>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut sections: Vec<RawSection> = Vec::new();
        let mut pending_key: Option<(String, Option<String>)> = None;
        let mut pending_value = String::new();

        let flush = |sections: &mut Vec<RawSection>, pending_key: &mut Option<(String, Option<String>)>, pending_value: &mut String| {
            if let Some((key, scope)) = pending_key.take() {
                if let Some(section) = sections.last_mut() {
                    section.entries.push(RawEntry { key, scope, value: std::mem::take(pending_value) });
                }
            }
        };

        for raw_line in text.lines() {
            let line = raw_line.trim_end();
            if line.trim_start().starts_with('#') || line.trim().is_empty() {
                if line.trim().is_empty() && pending_key.is_some() {
                    // blank line ends a continuation block.
                    flush(&mut sections, &mut pending_key, &mut pending_value);
                }
                continue;
            }
            if line.starts_with(char::is_whitespace) && pending_key.is_some() {
                pending_value.push('\n');
                pending_value.push_str(line.trim());
                continue;
            }
            flush(&mut sections, &mut pending_key, &mut pending_value);

            let trimmed = line.trim();
            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                sections.push(RawSection { name: name.to_string(), entries: Vec::new() });
                continue;
            }
            let Some((lhs, rhs)) = trimmed.split_once('=') else {
                return Err(ConfigError::Parse(format!("expected `key = value`, got: {trimmed}")));
            };
            if sections.is_empty() {
                return Err(ConfigError::Parse(format!("key `{}` outside of any [section]", lhs.trim())));
            }
            let lhs = lhs.trim();
            let (key, scope) = match lhs.split_once('@') {
                Some((k, s)) => (k.to_string(), Some(s.to_string())),
                None => (lhs.to_string(), None),
            };
            pending_key = Some((key, scope));
            pending_value = rhs.trim().to_string();
        }
        flush(&mut sections, &mut pending_key, &mut pending_value);
        Ok(Self { sections })
    }

    /// Serialize back to the on-disk grammar, used by the atomic-write path.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for entry in &section.entries {
                match &entry.scope {
                    Some(scope) => out.push_str(&format!("{}@{} = {}\n", entry.key, scope, entry.value)),
                    None => out.push_str(&format!("{} = {}\n", entry.key, entry.value)),
                }
            }
            out.push('\n');
        }
        out
    }
}
