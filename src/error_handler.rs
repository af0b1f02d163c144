//! Error normalization for the error side channel.
//!
//! Handler failures are turned into a [`NormalizedError`] before they are
//! written to `error.messages`: a short single-line message, a list of
//! human-readable errors, a status code, and the rendered error chain.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consumer::HandlerError;

/// Maximum length (in characters) of a normalized message.
pub const MAX_MESSAGE_LEN: usize = 120;

/// Message and error text used for failures that are not [`AppError`]s.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// One node of a validation failure tree.
///
/// `constraints` maps a constraint name to its message, in declaration
/// order; `children` hold failures of nested properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<ValidationError>,
}

impl ValidationError {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn constraint(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.constraints
            .insert(name.into(), Value::String(message.into()));
        self
    }

    pub fn child(mut self, child: ValidationError) -> Self {
        self.children.push(child);
        self
    }
}

/// A failure raised deliberately by business code, with a status code and an
/// optional validation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AppError {
    pub message: String,
    pub status_code: u16,
    pub errors: Option<Vec<ValidationError>>,
}

impl AppError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: 500,
            errors: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_validation(mut self, errors: Vec<ValidationError>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// A 400 validation failure.
    pub fn validation(message: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self::new(message).with_status(400).with_validation(errors)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for AppError {}

/// The message-safe error shape published to `error.messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedError {
    pub message: String,
    pub errors: Vec<String>,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl NormalizedError {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Converts a handler failure into a [`NormalizedError`].
///
/// Implemented for closures, so a consumer can be given an ad-hoc normalizer.
pub trait ErrorNormalizer: Send + Sync {
    fn normalize(&self, error: &HandlerError) -> NormalizedError;
}

impl<F> ErrorNormalizer for F
where
    F: Fn(&HandlerError) -> NormalizedError + Send + Sync,
{
    fn normalize(&self, error: &HandlerError) -> NormalizedError {
        self(error)
    }
}

/// The default normalizer.
///
/// - The message is the first 120 characters of the error text, line breaks
///   removed.
/// - [`AppError`]s keep their status code; a validation tree is flattened into
///   path-qualified strings, otherwise `errors` is the message itself.
/// - Decode failures are reported like an [`AppError`] with status 400.
/// - Anything else reports a generic error with status 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandler;

impl ErrorHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ErrorNormalizer for ErrorHandler {
    fn normalize(&self, error: &HandlerError) -> NormalizedError {
        let message = truncate_message(&error.to_string());
        let stack = Some(render_chain(error));

        let (errors, status_code) = match error {
            HandlerError::App(app) => {
                let errors = match &app.errors {
                    Some(tree) => flatten_validation_errors(tree),
                    None => vec![app.message.clone()],
                };
                (errors, app.status_code)
            }
            HandlerError::Decode(_) => (vec![message.clone()], error.status_code()),
            HandlerError::Other(_) => (vec![INTERNAL_ERROR.to_string()], 500),
        };

        NormalizedError {
            message,
            errors,
            status_code,
            stack,
        }
    }
}

/// Cut to [`MAX_MESSAGE_LEN`] characters, then drop CR and LF.
pub fn truncate_message(message: &str) -> String {
    message
        .chars()
        .take(MAX_MESSAGE_LEN)
        .filter(|c| *c != '\r' && *c != '\n')
        .collect()
}

/// Render an error and its `source()` chain, one cause per line.
pub fn render_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\n    caused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Flatten a validation tree depth-first into one string per violated
/// constraint, each qualified with the dotted property path.
pub fn flatten_validation_errors(errors: &[ValidationError]) -> Vec<String> {
    let mut out = Vec::new();
    for error in errors {
        collect(error, "", &mut out);
    }
    out
}

fn collect(error: &ValidationError, parent: &str, out: &mut Vec<String>) {
    let path = if parent.is_empty() {
        error.property.clone()
    } else {
        format!("{}.{}", parent, error.property)
    };

    for message in error.constraints.values().filter_map(Value::as_str) {
        out.push(qualify(message, &error.property, &path));
    }
    for child in &error.children {
        collect(child, &path, out);
    }
}

fn qualify(message: &str, property: &str, path: &str) -> String {
    if !property.is_empty() && message.contains(property) {
        message.replacen(property, path, 1)
    } else {
        format!("{}: {}", path, message)
    }
}
