// src/core/inputs.rs

use crate::{
    constants::ENV_INPUT_PREFIX,
    models::{InputType, ScriptInput},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while validating declared inputs or the values supplied for them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Input '{name}' is required but no value was supplied.")]
    Missing { name: String },
    #[error("Input '{name}' expects a number, got '{value}'.")]
    NotANumber { name: String, value: String },
    #[error("Input '{name}' expects 'true' or 'false', got '{value}'.")]
    NotABoolean { name: String, value: String },
    #[error("Input '{name}' must be one of [{options}], got '{value}'.")]
    NotAnOption {
        name: String,
        value: String,
        options: String,
    },
    #[error("Default value of input '{name}' does not match its type '{kind:?}'.")]
    DefaultMismatch { name: String, kind: InputType },
    #[error("Input name '{name}' is declared more than once.")]
    DuplicateName { name: String },
    #[error("Input at position {position} has an empty name.")]
    EmptyName { position: usize },
}

// --- TYPED VALUES ---

/// A validated value for one declared input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum InputValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Select(String),
    File(PathBuf),
}

impl InputValue {
    /// Validates a raw caller-supplied string against the input's declared type.
    pub fn parse(input: &ScriptInput, raw: &str) -> Result<Self, InputError> {
        match input.kind {
            InputType::String => Ok(Self::String(raw.to_string())),
            InputType::File => Ok(Self::File(PathBuf::from(raw))),
            InputType::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number)
                .ok_or_else(|| InputError::NotANumber {
                    name: input.name.clone(),
                    value: raw.to_string(),
                }),
            InputType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(InputError::NotABoolean {
                    name: input.name.clone(),
                    value: raw.to_string(),
                }),
            },
            InputType::Select => {
                if input.options.is_empty() || input.options.iter().any(|o| o == raw) {
                    Ok(Self::Select(raw.to_string()))
                } else {
                    Err(InputError::NotAnOption {
                        name: input.name.clone(),
                        value: raw.to_string(),
                        options: input.options.join(", "),
                    })
                }
            }
        }
    }

    /// Renders the value as it is handed to the process.
    pub fn to_arg(&self) -> String {
        match self {
            Self::String(s) | Self::Select(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::File(p) => p.to_string_lossy().into_owned(),
        }
    }
}

// --- DECLARATION CHECKS ---

/// Brings a declared default in line with the input's type.
///
/// Strings holding numbers or booleans are accepted for `number` and `boolean` inputs
/// and converted. `null` means no default.
pub fn coerce_default(input: &ScriptInput) -> Result<Option<Value>, InputError> {
    let mismatch = || InputError::DefaultMismatch {
        name: input.name.clone(),
        kind: input.kind,
    };
    let Some(default) = &input.default else {
        return Ok(None);
    };

    match (input.kind, default) {
        (_, Value::Null) => Ok(None),
        (InputType::String | InputType::File, Value::String(_)) => Ok(Some(default.clone())),
        (InputType::String, Value::Number(n)) => Ok(Some(Value::String(n.to_string()))),
        (InputType::String, Value::Bool(b)) => Ok(Some(Value::String(b.to_string()))),
        (InputType::Number, Value::Number(_)) => Ok(Some(default.clone())),
        (InputType::Number, Value::String(s)) if s.trim().is_empty() => Ok(None),
        (InputType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| Some(Value::Number(n)))
            .ok_or_else(mismatch),
        (InputType::Boolean, Value::Bool(_)) => Ok(Some(default.clone())),
        (InputType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(Value::Bool(true))),
            "false" => Ok(Some(Value::Bool(false))),
            "" => Ok(None),
            _ => Err(mismatch()),
        },
        (InputType::Select, Value::String(s))
            if s.is_empty() || input.options.is_empty() || input.options.contains(s) =>
        {
            Ok(Some(default.clone()))
        }
        _ => Err(mismatch()),
    }
}

/// Validates a full input declaration list: names must be non-empty and unique,
/// defaults must match their types. Returns the cleaned list plus one error per
/// rejected or corrected entry, so a single bad input never hides the others.
pub fn sanitize_declarations(inputs: Vec<ScriptInput>) -> (Vec<ScriptInput>, Vec<InputError>) {
    let mut seen = HashSet::new();
    let mut cleaned = Vec::with_capacity(inputs.len());
    let mut problems = Vec::new();

    for (position, mut input) in inputs.into_iter().enumerate() {
        input.name = input.name.trim().to_string();
        if input.name.is_empty() {
            problems.push(InputError::EmptyName { position });
            continue;
        }
        if !seen.insert(input.name.clone()) {
            problems.push(InputError::DuplicateName { name: input.name });
            continue;
        }
        match coerce_default(&input) {
            Ok(default) => input.default = default,
            Err(e) => {
                problems.push(e);
                input.default = None;
            }
        }
        cleaned.push(input);
    }
    (cleaned, problems)
}

// --- BINDING ---

/// Caller-supplied args mapped onto a script's declared inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundInputs {
    /// Positional arguments, in declared order, followed by any extra args.
    pub argv: Vec<String>,
    /// Variables routed from `env:`-prefixed inputs.
    pub env: BTreeMap<String, String>,
}

fn default_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Binds `args` to `inputs` one-to-one in declared order.
///
/// - An empty or missing arg falls back to the declared default; with neither, a
///   required input is an error and an optional one stays empty.
/// - Inputs named `env:NAME` become the environment variable `NAME` instead of argv.
/// - Trailing optional positionals with no value are dropped; inner ones are kept as
///   empty strings so later positions do not shift.
/// - Args beyond the declared inputs are appended unchanged.
pub fn bind(inputs: &[ScriptInput], args: &[String]) -> Result<BoundInputs, InputError> {
    let mut positional: Vec<Option<String>> = Vec::with_capacity(inputs.len());
    let mut env = BTreeMap::new();

    for (position, input) in inputs.iter().enumerate() {
        let supplied = args.get(position).filter(|a| !a.is_empty()).cloned();
        let raw = supplied.or_else(|| input.default.as_ref().and_then(default_text));

        let value = match raw {
            Some(raw) => Some(InputValue::parse(input, &raw)?.to_arg_preserving(&raw)),
            None if input.required => {
                return Err(InputError::Missing {
                    name: input.name.clone(),
                });
            }
            None => None,
        };

        match input.name.strip_prefix(ENV_INPUT_PREFIX) {
            Some(var) => {
                if let Some(value) = value {
                    env.insert(var.to_string(), value);
                }
            }
            None => positional.push(value),
        }
    }

    while matches!(positional.last(), Some(None)) {
        positional.pop();
    }
    let mut argv: Vec<String> = positional
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    argv.extend(args.iter().skip(inputs.len()).cloned());

    Ok(BoundInputs { argv, env })
}

impl InputValue {
    /// Like [`InputValue::to_arg`], but keeps the caller's spelling for numbers so
    /// `1.50` is not rewritten to `1.5`.
    fn to_arg_preserving(&self, raw: &str) -> String {
        match self {
            Self::Number(_) => raw.trim().to_string(),
            other => other.to_arg(),
        }
    }
}
