//! JSON patch assembly and application.
//!
//! Evaluators emit patch operations as data. The builder concatenates them in
//! catalogue order and makes each `add` valid against the pod document as it
//! stands at that point: when the target's parent containers do not exist
//! yet, the operation is rewritten to add the first missing container with
//! the value nested inside it.

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation};
use serde_json::{Map, Value};

use super::EvaluatorResult;
use super::error::{Error, Result};
use super::pod::PodSnapshot;

/// Build an `add` operation from unescaped path tokens
pub fn add<'a>(tokens: impl IntoIterator<Item = &'a str>, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens),
        value,
    })
}

/// Concatenate the patches of all evaluators that fired.
///
/// `NoAction` and `Reject` results are skipped. An empty result means the pod
/// is admitted unchanged.
pub fn build<'a>(
    results: impl IntoIterator<Item = &'a EvaluatorResult>,
    pod: &PodSnapshot,
) -> Result<Vec<PatchOperation>> {
    let mut working = pod.document().clone();
    let mut ops = Vec::new();

    for result in results {
        let EvaluatorResult::Patch(patch) = result else {
            continue;
        };
        for op in patch {
            let op = ensure_parents(&working, op.clone())?;
            json_patch::patch(&mut working, std::slice::from_ref(&op)).map_err(|e| {
                Error::MalformedPatchTarget {
                    path: op_path(&op),
                    reason: e.to_string(),
                }
            })?;
            ops.push(op);
        }
    }

    Ok(ops)
}

/// Apply a patch to a snapshot, producing the patched snapshot
pub fn apply(pod: &PodSnapshot, patch: &[PatchOperation]) -> Result<PodSnapshot> {
    let mut document = pod.document().clone();
    json_patch::patch(&mut document, patch)?;
    PodSnapshot::from_document(document)
}

fn op_path(op: &PatchOperation) -> String {
    match op {
        PatchOperation::Add(o) => o.path.to_string(),
        PatchOperation::Remove(o) => o.path.to_string(),
        PatchOperation::Replace(o) => o.path.to_string(),
        PatchOperation::Move(o) => o.path.to_string(),
        PatchOperation::Copy(o) => o.path.to_string(),
        PatchOperation::Test(o) => o.path.to_string(),
    }
}

fn malformed(path: &PointerBuf, reason: &str) -> Error {
    Error::MalformedPatchTarget {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Rewrite an `add` whose ancestors are missing into an `add` of the first
/// missing ancestor. Other operations pass through unchanged.
fn ensure_parents(document: &Value, op: PatchOperation) -> Result<PatchOperation> {
    let add = match op {
        PatchOperation::Add(add) => add,
        other => return Ok(other),
    };

    let tokens: Vec<String> = add
        .path
        .tokens()
        .map(|t| t.decoded().into_owned())
        .collect();
    let parents = tokens.len().saturating_sub(1);

    let mut current = document;
    for (depth, token) in tokens.iter().take(parents).enumerate() {
        let next = match current {
            Value::Object(map) => map.get(token).filter(|v| !v.is_null()),
            Value::Array(items) => {
                let index = token
                    .parse::<usize>()
                    .map_err(|_| malformed(&add.path, "array index expected"))?;
                Some(
                    items
                        .get(index)
                        .ok_or_else(|| malformed(&add.path, "array index out of range"))?,
                )
            }
            _ => return Err(malformed(&add.path, "parent is not an object or array")),
        };

        match next {
            Some(value) => current = value,
            None => {
                let mut value = add.value;
                for key in tokens.iter().skip(depth + 1).rev() {
                    let mut map = Map::new();
                    map.insert(key.clone(), value);
                    value = Value::Object(map);
                }
                return Ok(PatchOperation::Add(AddOperation {
                    path: PointerBuf::from_tokens(tokens.iter().take(depth + 1).map(String::as_str)),
                    value,
                }));
            }
        }
    }

    match current {
        Value::Object(_) | Value::Array(_) => Ok(PatchOperation::Add(add)),
        _ => Err(malformed(&add.path, "parent is not an object or array")),
    }
}
