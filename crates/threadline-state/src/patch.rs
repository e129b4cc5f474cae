//! Ordered add/replace/remove operations over a JSON tree.
//!
//! Paths are JSON pointers (`/a/b/0`, with `~1` for `/` and `~0` for `~`).
//! `add` on an array inserts at the index and accepts `-` to append.
//! A patch either applies completely or not at all: operations run against a
//! working copy which is only returned once every operation succeeded.

use serde_json::Value;
use thiserror::Error;
use threadline_types::PatchOperation;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    #[error("Invalid JSON pointer: {path}")]
    InvalidPath { path: String },

    #[error("Invalid array index '{index}' in {path}")]
    InvalidIndex { path: String, index: String },

    #[error("Cannot descend into a scalar at {path}")]
    NotAContainer { path: String },
}

/// Apply `operations` in order and return the patched tree.
///
/// On error `document` is untouched and no partial result escapes.
pub fn apply_patch(document: &Value, operations: &[PatchOperation]) -> Result<Value, PatchError> {
    let mut working = document.clone();
    for operation in operations {
        apply_operation(&mut working, operation)?;
    }
    Ok(working)
}

fn apply_operation(document: &mut Value, operation: &PatchOperation) -> Result<(), PatchError> {
    let path = operation.path();
    let mut tokens = parse_pointer(path)?;

    let Some(last) = tokens.pop() else {
        // The empty pointer addresses the whole document.
        return match operation {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                *document = value.clone();
                Ok(())
            }
            PatchOperation::Remove { .. } => Err(PatchError::InvalidPath {
                path: path.to_string(),
            }),
        };
    };

    let parent = resolve_mut(document, &tokens, path)?;
    match operation {
        PatchOperation::Add { value, .. } => add(parent, &last, value.clone(), path),
        PatchOperation::Replace { value, .. } => replace(parent, &last, value.clone(), path),
        PatchOperation::Remove { .. } => remove(parent, &last, path),
    }
}

fn add(parent: &mut Value, token: &str, value: Value, path: &str) -> Result<(), PatchError> {
    match parent {
        Value::Object(map) => {
            map.insert(token.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(token, path)?;
            if index > items.len() {
                return Err(PatchError::InvalidIndex {
                    path: path.to_string(),
                    index: token.to_string(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::NotAContainer {
            path: path.to_string(),
        }),
    }
}

fn replace(parent: &mut Value, token: &str, value: Value, path: &str) -> Result<(), PatchError> {
    let target = child_mut(parent, token, path)?;
    *target = value;
    Ok(())
}

fn remove(parent: &mut Value, token: &str, path: &str) -> Result<(), PatchError> {
    match parent {
        Value::Object(map) => map
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| PatchError::PathNotFound {
                path: path.to_string(),
            }),
        Value::Array(items) => {
            let index = parse_index(token, path)?;
            if index >= items.len() {
                return Err(PatchError::PathNotFound {
                    path: path.to_string(),
                });
            }
            items.remove(index);
            Ok(())
        }
        _ => Err(PatchError::NotAContainer {
            path: path.to_string(),
        }),
    }
}

fn resolve_mut<'a>(
    document: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = document;
    for token in tokens {
        current = child_mut(current, token, path)?;
    }
    Ok(current)
}

fn child_mut<'a>(parent: &'a mut Value, token: &str, path: &str) -> Result<&'a mut Value, PatchError> {
    match parent {
        Value::Object(map) => map.get_mut(token).ok_or_else(|| PatchError::PathNotFound {
            path: path.to_string(),
        }),
        Value::Array(items) => {
            let index = parse_index(token, path)?;
            items.get_mut(index).ok_or_else(|| PatchError::PathNotFound {
                path: path.to_string(),
            })
        }
        _ => Err(PatchError::NotAContainer {
            path: path.to_string(),
        }),
    }
}

fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPath {
            path: path.to_string(),
        });
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Array indices are plain decimal without leading zeros.
fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));

    token
        .parse::<usize>()
        .ok()
        .filter(|_| well_formed)
        .ok_or_else(|| PatchError::InvalidIndex {
            path: path.to_string(),
            index: token.to_string(),
        })
}
