// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Halimede-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Halimede and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Result references and creation-id placeholders.
//!
//! Before an invocation is dispatched its arguments are rewritten in two passes:
//!
//! 1. every top-level `#name` key holding a [`ResultReference`] becomes `name` with the value
//!    found at the reference's path inside an earlier result;
//! 2. every `#creationId` string in an id position is replaced by the server id bound in the
//!    [`CreatedIds`] table.
//!
//! Both passes only read the results recorded so far and the table, so the same inputs always
//! produce the same arguments.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::created_ids::CreatedIds;
use crate::model::{Arguments, CallId, InvocationResult, MethodError};

const REFERENCE_PREFIX: char = '#';
const WILDCARD: &str = "*";

/// Placeholder pointing into the result of an earlier invocation of the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResultReference {
    pub result_of: CallId,
    pub name: String,
    pub path: String,
}

impl ResultReference {
    pub fn new(
        result_of: impl Into<CallId>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self { result_of: result_of.into(), name: name.into(), path: path.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Key(Cow<'a, str>),
    Wildcard,
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Wildcard => f.write_str(WILDCARD),
        }
    }
}

type Segments<'a> = SmallVec<[Segment<'a>; 6]>;

fn parse_path(path: &str) -> Result<Segments<'_>, PathError> {
    let mut segments = Segments::new();
    if path.is_empty() {
        return Ok(segments);
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PathError::MissingLeadingSlash);
    };

    for raw in rest.split('/') {
        if raw == WILDCARD {
            segments.push(Segment::Wildcard);
        } else {
            segments.push(Segment::Key(unescape_segment(raw)?));
        }
    }
    Ok(segments)
}

fn unescape_segment(raw: &str) -> Result<Cow<'_, str>, PathError> {
    if !raw.contains('~') {
        return Ok(Cow::Borrowed(raw));
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PathError::InvalidEscape { segment: raw.to_owned() }),
        }
    }
    Ok(Cow::Owned(out))
}

/// Applies a parsed path to `value`.
///
/// `*` maps the remaining path over an array; array-valued results are spliced into the output
/// so nested wildcards flatten into a single array in element order.
fn evaluate(value: &Value, segments: &[Segment<'_>], depth: usize) -> Result<Value, PathError> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };

    match segment {
        Segment::Wildcard => {
            let Value::Array(items) = value else {
                return Err(PathError::WildcardOnNonArray { depth, found: value_kind(value) });
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match evaluate(item, rest, depth + 1)? {
                    Value::Array(nested) => out.extend(nested),
                    other => out.push(other),
                }
            }
            Ok(Value::Array(out))
        }
        Segment::Key(key) => {
            let Value::Object(map) = value else {
                return Err(PathError::KeyOnNonObject {
                    depth,
                    key: key.to_string(),
                    found: value_kind(value),
                });
            };
            let child = map
                .get(key.as_ref())
                .ok_or_else(|| PathError::MissingKey { depth, key: key.to_string() })?;
            evaluate(child, rest, depth + 1)
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluates a reference path against an argument object.
pub fn evaluate_path(arguments: &Arguments, path: &str) -> Result<Value, PathError> {
    let segments = parse_path(path)?;
    let Some((first, rest)) = segments.split_first() else {
        return Ok(Value::Object(arguments.clone()));
    };
    match first {
        Segment::Key(key) => {
            let child = arguments
                .get(key.as_ref())
                .ok_or_else(|| PathError::MissingKey { depth: 0, key: key.to_string() })?;
            evaluate(child, rest, 1)
        }
        Segment::Wildcard => Err(PathError::WildcardOnNonArray { depth: 0, found: "object" }),
    }
}

/// Resolves `reference` against the results recorded so far.
pub fn resolve_reference(
    reference: &ResultReference,
    results: &[InvocationResult],
) -> Result<Value, ReferenceError> {
    let Some(result) = results.iter().find(|result| result.call_id() == &reference.result_of)
    else {
        return Err(ReferenceError::NotExecuted { call_id: reference.result_of.clone() });
    };

    let invocation = match result {
        InvocationResult::Success(invocation) => invocation,
        InvocationResult::Error { .. } => {
            return Err(ReferenceError::FailedCall { call_id: reference.result_of.clone() });
        }
    };

    if invocation.name != reference.name {
        return Err(ReferenceError::NameMismatch {
            call_id: reference.result_of.clone(),
            expected: reference.name.clone(),
            found: invocation.name.clone(),
        });
    }

    evaluate_path(&invocation.arguments, &reference.path).map_err(|source| ReferenceError::Path {
        call_id: reference.result_of.clone(),
        path: reference.path.clone(),
        source,
    })
}

/// Rewrites `arguments` so that no reference or creation-id placeholder remains.
pub fn resolve_arguments(
    arguments: Arguments,
    results: &[InvocationResult],
    created_ids: &CreatedIds,
) -> Result<Arguments, ArgumentError> {
    if let Some(key) = arguments.keys().find_map(|key| {
        key.strip_prefix(REFERENCE_PREFIX).filter(|plain| arguments.contains_key(*plain))
    }) {
        return Err(ArgumentError::Conflict { key: key.to_owned() });
    }

    let mut resolved = Arguments::new();
    for (key, value) in arguments {
        match key.strip_prefix(REFERENCE_PREFIX) {
            Some(plain) => {
                let reference: ResultReference = serde_json::from_value(value).map_err(|err| {
                    ReferenceError::Malformed { key: key.clone(), reason: err.to_string() }
                })?;
                let value = resolve_reference(&reference, results)?;
                resolved.insert(plain.to_owned(), value);
            }
            None => {
                resolved.insert(key, value);
            }
        }
    }

    for (key, value) in resolved.iter_mut() {
        substitute_creation_ids(key, value, created_ids)?;
    }
    Ok(resolved)
}

fn is_id_property(key: &str) -> bool {
    key == "id" || (key.ends_with("Id") && key != "accountId" && key != "fromAccountId")
}

fn is_id_list(key: &str) -> bool {
    key == "ids" || key == "destroy" || key.ends_with("Ids")
}

fn is_id_map(key: &str) -> bool {
    key == "update" || key.ends_with("Ids")
}

fn lookup_creation_id(
    placeholder: &str,
    created_ids: &CreatedIds,
) -> Result<Option<String>, ReferenceError> {
    let Some(creation_id) = placeholder.strip_prefix(REFERENCE_PREFIX) else {
        return Ok(None);
    };
    created_ids
        .resolve(creation_id)
        .map(|server_id| Some(server_id.as_str().to_owned()))
        .ok_or_else(|| ReferenceError::UnknownCreationId { creation_id: creation_id.to_owned() })
}

/// Replaces `#creationId` placeholders below `key`, recursing into nested structures.
fn substitute_creation_ids(
    key: &str,
    value: &mut Value,
    created_ids: &CreatedIds,
) -> Result<(), ArgumentError> {
    match value {
        Value::String(text) if is_id_property(key) => {
            if let Some(server_id) = lookup_creation_id(text, created_ids)? {
                *text = server_id;
            }
        }
        Value::Array(items) => {
            let id_list = is_id_list(key);
            for item in items.iter_mut() {
                match item {
                    Value::String(text) if id_list => {
                        if let Some(server_id) = lookup_creation_id(text, created_ids)? {
                            *text = server_id;
                        }
                    }
                    other => substitute_creation_ids("", other, created_ids)?,
                }
            }
        }
        Value::Object(map) => {
            if is_id_map(key) && map.keys().any(|k| k.starts_with(REFERENCE_PREFIX)) {
                let entries = std::mem::take(map);
                let mut written_by: HashMap<String, String> = HashMap::new();
                for (child_key, child) in entries {
                    let resolved = lookup_creation_id(&child_key, created_ids)?
                        .unwrap_or_else(|| child_key.clone());
                    if let Some(first) = written_by.insert(resolved.clone(), child_key.clone()) {
                        return Err(ArgumentError::IdKeyCollision {
                            key: key.to_owned(),
                            first,
                            second: child_key,
                            server_id: resolved,
                        });
                    }
                    map.insert(resolved, child);
                }
            }
            for (child_key, child) in map.iter_mut() {
                substitute_creation_ids(child_key, child, created_ids)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    MissingLeadingSlash,
    InvalidEscape { segment: String },
    MissingKey { depth: usize, key: String },
    KeyOnNonObject { depth: usize, key: String, found: &'static str },
    WildcardOnNonArray { depth: usize, found: &'static str },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLeadingSlash => f.write_str("path must be empty or start with '/'"),
            Self::InvalidEscape { segment } => {
                write!(f, "invalid '~' escape in segment {segment:?}")
            }
            Self::MissingKey { depth, key } => {
                write!(f, "no key {key:?} at segment {depth}")
            }
            Self::KeyOnNonObject { depth, key, found } => {
                write!(f, "cannot look up key {key:?} in {found} at segment {depth}")
            }
            Self::WildcardOnNonArray { depth, found } => {
                write!(f, "'*' applied to {found} at segment {depth}")
            }
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The referenced call id has no recorded result (forward reference or unknown id).
    NotExecuted { call_id: CallId },
    FailedCall { call_id: CallId },
    NameMismatch { call_id: CallId, expected: String, found: String },
    Path { call_id: CallId, path: String, source: PathError },
    Malformed { key: String, reason: String },
    UnknownCreationId { creation_id: String },
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExecuted { call_id } => {
                write!(f, "result reference to call {call_id:?} which has not been executed")
            }
            Self::FailedCall { call_id } => {
                write!(f, "result reference to call {call_id:?} which failed")
            }
            Self::NameMismatch { call_id, expected, found } => write!(
                f,
                "result reference expected {expected:?} for call {call_id:?} but found {found:?}"
            ),
            Self::Path { call_id, path, source } => {
                write!(f, "result reference path {path:?} into call {call_id:?}: {source}")
            }
            Self::Malformed { key, reason } => {
                write!(f, "argument {key:?} is not a valid result reference: {reason}")
            }
            Self::UnknownCreationId { creation_id } => {
                write!(f, "creation id #{creation_id} was not created earlier in this request")
            }
        }
    }
}

impl std::error::Error for ReferenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Path { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// Both `name` and `#name` were supplied.
    Conflict { key: String },
    /// Two keys of the id map `key` name the same server id once placeholders are resolved.
    IdKeyCollision { key: String, first: String, second: String, server_id: String },
    Reference(ReferenceError),
}

impl From<ReferenceError> for ArgumentError {
    fn from(err: ReferenceError) -> Self {
        Self::Reference(err)
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { key } => {
                write!(f, "argument {key:?} given both directly and as a result reference")
            }
            Self::IdKeyCollision { key, first, second, server_id } => write!(
                f,
                "{key}: keys {first:?} and {second:?} both address {server_id:?}"
            ),
            Self::Reference(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ArgumentError {}

impl From<ArgumentError> for MethodError {
    fn from(err: ArgumentError) -> Self {
        match &err {
            ArgumentError::Conflict { .. } | ArgumentError::IdKeyCollision { .. } => {
                MethodError::invalid_arguments(err.to_string())
            }
            ArgumentError::Reference(_) => MethodError::invalid_result_reference(err.to_string()),
        }
    }
}
