//! Character-level diff-and-delta codec.
//!
//! A delta is a compact textual encoding of the transformation from a base
//! text to a target text: ops joined by `;`, where `=N` keeps N characters
//! of the base, `-N` drops N characters, and `+text` inserts `text`
//! (percent-encoded). Counts are in Unicode scalar values, so the codec is
//! safe on multi-byte content.
//!
//! A delta is meaningful only relative to the exact base it was computed
//! against; [`apply`] rejects deltas whose counts do not consume the base
//! precisely.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use similar::{ChangeTag, TextDiff};
use thiserror::Error;

/// Bytes that must be escaped inside an insert op: the op separator, the
/// escape character itself, and anything that would garble a log line.
const INSERT_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b';').add(b'+');

/// Reasons a delta fails to apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// An op could not be parsed.
    #[error("malformed delta op `{op}`")]
    Parse { op: String },

    /// The delta's keep/drop counts do not match the base text.
    #[error("delta does not fit base text: {reason}")]
    BaseMismatch { reason: String },
}

/// Encode the transformation from `base` to `target`.
#[must_use]
pub fn between(base: &str, target: &str) -> String {
    let diff = TextDiff::from_chars(base, target);

    let mut ops: Vec<String> = Vec::new();
    let mut kept = 0usize;
    let mut dropped = 0usize;
    let mut inserted = String::new();

    let mut flush = |kept: &mut usize, dropped: &mut usize, inserted: &mut String| {
        if *kept > 0 {
            ops.push(format!("={kept}"));
            *kept = 0;
        }
        if *dropped > 0 {
            ops.push(format!("-{dropped}"));
            *dropped = 0;
        }
        if !inserted.is_empty() {
            let encoded = utf8_percent_encode(inserted, INSERT_ESCAPES);
            ops.push(format!("+{encoded}"));
            inserted.clear();
        }
    };

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                if dropped > 0 || !inserted.is_empty() {
                    flush(&mut kept, &mut dropped, &mut inserted);
                }
                kept += change.value().chars().count();
            }
            ChangeTag::Delete => {
                if kept > 0 || !inserted.is_empty() {
                    flush(&mut kept, &mut dropped, &mut inserted);
                }
                dropped += change.value().chars().count();
            }
            ChangeTag::Insert => {
                if kept > 0 || dropped > 0 {
                    flush(&mut kept, &mut dropped, &mut inserted);
                }
                inserted.push_str(change.value());
            }
        }
    }
    flush(&mut kept, &mut dropped, &mut inserted);

    ops.join(";")
}

/// Reconstruct the target text from `base` and a delta produced by
/// [`between`].
///
/// # Errors
/// Returns [`DeltaError`] when an op is malformed or the counts do not
/// consume the base exactly. The base is not modified in any case.
pub fn apply(base: &str, delta: &str) -> Result<String, DeltaError> {
    let mut chars = base.chars();
    let mut out = String::with_capacity(delta.len().max(base.len()));

    if !delta.is_empty() {
        for op in delta.split(';') {
            let Some(kind) = op.chars().next() else {
                return Err(DeltaError::Parse { op: op.to_string() });
            };
            let arg = &op[kind.len_utf8()..];
            match kind {
                '=' => {
                    let n = parse_count(op, arg)?;
                    let mut taken = 0;
                    for c in chars.by_ref().take(n) {
                        out.push(c);
                        taken += 1;
                    }
                    if taken < n {
                        return Err(DeltaError::BaseMismatch {
                            reason: format!("cannot keep {n} chars, base exhausted"),
                        });
                    }
                }
                '-' => {
                    let n = parse_count(op, arg)?;
                    if chars.by_ref().take(n).count() < n {
                        return Err(DeltaError::BaseMismatch {
                            reason: format!("cannot drop {n} chars, base exhausted"),
                        });
                    }
                }
                '+' => {
                    let decoded = percent_decode_str(arg).decode_utf8().map_err(|_| {
                        DeltaError::Parse { op: op.to_string() }
                    })?;
                    out.push_str(&decoded);
                }
                _ => return Err(DeltaError::Parse { op: op.to_string() }),
            }
        }
    }

    if chars.next().is_some() {
        return Err(DeltaError::BaseMismatch {
            reason: "base text longer than delta accounts for".to_string(),
        });
    }

    Ok(out)
}

fn parse_count(op: &str, arg: &str) -> Result<usize, DeltaError> {
    let n: usize = arg
        .parse()
        .map_err(|_| DeltaError::Parse { op: op.to_string() })?;
    if n == 0 {
        return Err(DeltaError::Parse { op: op.to_string() });
    }
    Ok(n)
}
