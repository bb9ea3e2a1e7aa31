//! Parser for the key-versioned quoted-value localization format.
//!
//! ```text
//! l_english:
//!  trait_brave:0 "Brave"
//!  desc:2 "[ROOT.Char.GetName] is $bonus$."
//! ```
//!
//! Not YAML: values carry scripted refs `[..]`, variable refs `$name$`,
//! icon refs `@name!`, and format toggles `#code … #!`. Malformed lines
//! become diagnostics; the file parses as far as possible.

use super::script::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static LANGUAGE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*l_([a-z_]+):\s*$").expect("static regex"));

// key:VERSION "value" — version optional, keys may contain dots and may
// start with a digit.
static LOC_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([A-Za-z0-9_][A-Za-z0-9_.]*):(\d*)\s+"(.*)"\s*$"#).expect("static regex")
});

static SCRIPTED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("static regex"));
static VARIABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\$").expect("static regex"));
static ICON_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)!?").expect("static regex"));
static FORMAT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[A-Za-z_]+").expect("static regex"));

/// One parsed localization entry, with the references extracted from its
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocEntry {
    pub key: String,
    pub version: u32,
    pub raw_value: String,
    pub line: u32,
    pub scripted_refs: Vec<String>,
    pub variable_refs: Vec<String>,
    pub icon_refs: Vec<String>,
}

impl LocEntry {
    /// Display text with all runtime codes stripped and whitespace
    /// collapsed.
    pub fn plain_text(&self) -> String {
        let text = SCRIPTED_REF.replace_all(&self.raw_value, "");
        let text = VARIABLE_REF.replace_all(&text, "");
        let text = text.replace("#!", "");
        let text = FORMAT_CODE.replace_all(&text, "");
        let text = ICON_REF.replace_all(&text, "");
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// A parsed localization file. Entries keep insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocFile {
    pub language: String,
    pub entries: Vec<LocEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse localization source. BOM is stripped; line endings normalized.
pub fn parse_localization(content: &str) -> LocFile {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut language: Option<String> = None;
    let mut entries = Vec::new();
    let mut diagnostics = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let line = raw_line.trim_end_matches('\r');
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        if let Some(caps) = LANGUAGE_HEADER.captures(line) {
            if language.is_none() {
                language = Some(caps[1].to_string());
            }
            continue;
        }

        if let Some(caps) = LOC_ENTRY.captures(line) {
            let key = caps[1].to_string();
            let version = caps[2].parse::<u32>().unwrap_or(0);
            let raw_value = caps[3].to_string();
            let scripted_refs = SCRIPTED_REF
                .captures_iter(&raw_value)
                .map(|c| c[1].to_string())
                .collect();
            let variable_refs = VARIABLE_REF
                .captures_iter(&raw_value)
                .map(|c| c[1].to_string())
                .collect();
            let icon_refs = ICON_REF
                .captures_iter(&raw_value)
                .map(|c| c[1].to_string())
                .collect();
            entries.push(LocEntry {
                key,
                version,
                raw_value,
                line: line_no,
                scripted_refs,
                variable_refs,
                icon_refs,
            });
            continue;
        }

        // A line that looks like an entry but did not match.
        if stripped.contains(':') && stripped.contains('"') {
            let preview: String = stripped.chars().take(60).collect();
            diagnostics.push(Diagnostic::new(
                line_no,
                1,
                format!("malformed localization entry: {preview}"),
            ));
        }
    }

    LocFile {
        language: language.unwrap_or_else(|| "unknown".to_string()),
        entries,
        diagnostics,
    }
}
