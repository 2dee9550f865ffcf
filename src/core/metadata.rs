// src/core/metadata.rs

use crate::constants::HEADER_SCAN_LINES;
use crate::core::inputs::{self, InputError};
use crate::models::ScriptInput;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    /// A comment line declaring a field: `# @name: Deploy`, `// @tags: ["ops"]`.
    static ref FIELD_RE: Regex =
        Regex::new(r"^\s*(?://+|#+|--|;+)\s*@([A-Za-z][\w-]*)\s*:\s?(.*)$")
            .expect("Invalid header field regex");
    /// Any comment line; captures its text without the marker.
    static ref COMMENT_RE: Regex =
        Regex::new(r"^\s*(?://+|#+|--|;+)\s?(.*)$").expect("Invalid comment regex");
}

/// Metadata read from a script's leading comment block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptHeader {
    pub name: Option<String>,
    pub description: String,
    pub author: String,
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub inputs: Vec<ScriptInput>,
    /// Problems that did not prevent the script from being catalogued.
    pub warnings: Vec<String>,
}

/// Parses the metadata header from the first lines of `content`.
///
/// Never fails: a malformed field is skipped and reported in `warnings`, and a
/// file without any header yields an empty `ScriptHeader`.
pub fn parse_header(content: &str) -> ScriptHeader {
    let mut header = ScriptHeader::default();
    let mut lines = content.lines().take(HEADER_SCAN_LINES).peekable();

    while let Some(line) = lines.next() {
        let Some(caps) = FIELD_RE.captures(line) else {
            continue;
        };
        let key = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let value = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();

        match key.as_str() {
            "name" => header.name = non_empty(value),
            "description" => header.description = value,
            "author" => header.author = value,
            "version" => header.version = non_empty(value),
            "category" => header.category = non_empty(value),
            "tags" => match parse_tags(&value) {
                Ok(tags) => header.tags = tags,
                Err(message) => header.warnings.push(message),
            },
            "inputs" => {
                let mut json = value;
                // The array may continue on following comment lines.
                while is_incomplete_json(&json) {
                    let Some(next) = lines.next_if(|l| COMMENT_RE.is_match(l) && !FIELD_RE.is_match(l))
                    else {
                        break;
                    };
                    if let Some(text) = COMMENT_RE.captures(next).and_then(|c| c.get(1)) {
                        json.push('\n');
                        json.push_str(text.as_str());
                    }
                }
                match parse_inputs(&json) {
                    Ok((inputs, problems)) => {
                        header.inputs = inputs;
                        header
                            .warnings
                            .extend(problems.iter().map(InputError::to_string));
                    }
                    Err(message) => header.warnings.push(message),
                }
            }
            other => log::debug!("Ignoring unknown header field '@{}'.", other),
        }
    }
    header
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn is_incomplete_json(text: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(_) => false,
        Err(e) => e.is_eof(),
    }
}

/// Accepts `["a", "b"]` or `a, b`.
fn parse_tags(value: &str) -> Result<BTreeSet<String>, String> {
    let raw: Vec<String> = if value.starts_with('[') {
        serde_json::from_str(value).map_err(|e| format!("Invalid @tags JSON array: {}", e))?
    } else {
        value.split(',').map(str::to_string).collect()
    };
    Ok(raw
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

fn parse_inputs(json: &str) -> Result<(Vec<ScriptInput>, Vec<InputError>), String> {
    if json.trim().is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let declared: Vec<ScriptInput> =
        serde_json::from_str(json).map_err(|e| format!("Invalid @inputs JSON: {}", e))?;
    Ok(inputs::sanitize_declarations(declared))
}
