//! Pattern-based field redaction for canonical event content.
//!
//! # Pattern syntax
//!
//! - `"title"` -- remove the top-level field `title`
//! - `"policy.approver"` -- remove `approver` inside `policy`
//! - `"attendees.email"` -- arrays are transparent: remove `email` from every
//!   element of `attendees`
//! - `"*.email"` -- remove `email` at any depth
//!
//! Unlike a silent filter, redaction reports which patterns actually removed
//! something, so the caller can record them in `privacy.redactions`.

use serde_json::{Map, Value};

#[derive(Debug, Clone)]
struct Rule<'a> {
    /// Index into the caller's pattern list.
    origin: usize,
    segments: Vec<&'a str>,
}

/// Remove every field matched by `patterns`.
///
/// Returns the redacted value and the patterns that matched at least one
/// field, in the order they were given.
///
/// ```
/// use serde_json::json;
/// use reschedule_engine::cleaning::redact_fields;
///
/// let content = json!({"title": "Dentist", "startAt": "2026-03-02T09:00:00Z"});
/// let (redacted, hits) = redact_fields(&content, &["title", "location"]);
/// assert_eq!(redacted, json!({"startAt": "2026-03-02T09:00:00Z"}));
/// assert_eq!(hits, vec!["title".to_string()]);
/// ```
pub fn redact_fields(value: &Value, patterns: &[&str]) -> (Value, Vec<String>) {
    if patterns.is_empty() {
        return (value.clone(), Vec::new());
    }

    let rules: Vec<Rule<'_>> = patterns
        .iter()
        .enumerate()
        .map(|(origin, p)| Rule {
            origin,
            segments: p.split('.').collect(),
        })
        .collect();

    let mut hits = vec![false; patterns.len()];
    let redacted = walk(value, &rules, &mut hits);

    let matched = patterns
        .iter()
        .zip(hits)
        .filter_map(|(p, hit)| hit.then(|| (*p).to_string()))
        .collect();

    (redacted, matched)
}

fn walk(value: &Value, rules: &[Rule<'_>], hits: &mut [bool]) -> Value {
    match value {
        Value::Object(map) => walk_object(map, rules, hits),
        Value::Array(items) => Value::Array(items.iter().map(|v| walk(v, rules, hits)).collect()),
        other => other.clone(),
    }
}

fn walk_object(map: &Map<String, Value>, rules: &[Rule<'_>], hits: &mut [bool]) -> Value {
    let mut out = Map::new();

    for (key, child) in map {
        let mut removed_by: Option<usize> = None;
        let mut narrowed: Vec<Rule<'_>> = Vec::new();

        for rule in rules {
            let Some((&head, rest)) = rule.segments.split_first() else {
                continue;
            };

            if head == "*" {
                match rest {
                    [] => {
                        removed_by = Some(rule.origin);
                        break;
                    }
                    [only] if only == key => {
                        removed_by = Some(rule.origin);
                        break;
                    }
                    [next, tail @ ..] if next == key || *next == "*" => {
                        narrowed.push(Rule {
                            origin: rule.origin,
                            segments: tail.to_vec(),
                        });
                    }
                    _ => {}
                }
                // The wildcard keeps looking at deeper levels.
                narrowed.push(rule.clone());
            } else if head == key {
                if rest.is_empty() {
                    removed_by = Some(rule.origin);
                    break;
                }
                narrowed.push(Rule {
                    origin: rule.origin,
                    segments: rest.to_vec(),
                });
            }
        }

        if let Some(origin) = removed_by {
            hits[origin] = true;
            continue;
        }

        let child = if narrowed.is_empty() {
            child.clone()
        } else {
            walk(child, &narrowed, hits)
        };
        out.insert(key.clone(), child);
    }

    Value::Object(out)
}
