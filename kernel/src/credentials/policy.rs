// Storage Access Policy
//
// Generates the session policy attached to every vended credential and
// evaluates requests against it. A policy only ever names prefixes of a
// single table location.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AccessMode;
use crate::metadata::{DATA_DIR, METADATA_DIR};
use crate::storage::ObjectPath;

pub const POLICY_VERSION: &str = "2012-10-17";

pub const ACTION_GET_OBJECT: &str = "s3:GetObject";
pub const ACTION_GET_OBJECT_VERSION: &str = "s3:GetObjectVersion";
pub const ACTION_LIST_BUCKET: &str = "s3:ListBucket";
pub const ACTION_PUT_OBJECT: &str = "s3:PutObject";
pub const ACTION_DELETE_OBJECT: &str = "s3:DeleteObject";

const PREFIX_CONDITION_KEY: &str = "s3:prefix";

/// Which part of the table location write credentials may modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteScope {
    /// Everything under the table location.
    #[default]
    TableLocation,
    /// Only the data prefix.
    DataOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "StringLike")]
    pub string_like: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessPolicy {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

fn object_arn(bucket: &str, key_pattern: &str) -> String {
    format!("arn:aws:s3:::{bucket}/{key_pattern}")
}

impl AccessPolicy {
    /// Session policy for one table location.
    ///
    /// Reads cover the data and metadata prefixes. Writes add put and
    /// delete on the scope chosen by `write_scope`.
    pub fn for_table(location: &ObjectPath, mode: AccessMode, write_scope: WriteScope) -> Self {
        let bucket = location.bucket();
        let base = location.key().trim_end_matches('/');
        let data = format!("{base}/{DATA_DIR}/");
        let metadata = format!("{base}/{METADATA_DIR}/");

        let mut listable = vec![format!("{data}*"), format!("{metadata}*")];
        let mut statements = vec![PolicyStatement {
            effect: Effect::Allow,
            action: vec![
                ACTION_GET_OBJECT.to_string(),
                ACTION_GET_OBJECT_VERSION.to_string(),
            ],
            resource: vec![
                object_arn(bucket, &format!("{data}*")),
                object_arn(bucket, &format!("{metadata}*")),
            ],
            condition: None,
        }];

        if mode == AccessMode::Write {
            let writable = match write_scope {
                WriteScope::TableLocation => format!("{base}/*"),
                WriteScope::DataOnly => format!("{data}*"),
            };
            statements.push(PolicyStatement {
                effect: Effect::Allow,
                action: vec![
                    ACTION_PUT_OBJECT.to_string(),
                    ACTION_DELETE_OBJECT.to_string(),
                ],
                resource: vec![object_arn(bucket, &writable)],
                condition: None,
            });
            // anything writable must also be readable and listable
            if write_scope == WriteScope::TableLocation {
                statements[0]
                    .resource
                    .push(object_arn(bucket, &writable));
                listable.push(writable);
            }
        }

        statements.push(PolicyStatement {
            effect: Effect::Allow,
            action: vec![ACTION_LIST_BUCKET.to_string()],
            resource: vec![bucket_arn(bucket)],
            condition: Some(Condition {
                string_like: BTreeMap::from([(PREFIX_CONDITION_KEY.to_string(), listable)]),
            }),
        });

        Self {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        }
    }

    /// Whether `action` on an object is allowed.
    pub fn allows_object(&self, action: &str, path: &ObjectPath) -> bool {
        let arn = object_arn(path.bucket(), path.key());
        self.statement.iter().any(|s| {
            s.effect == Effect::Allow
                && s.action.iter().any(|a| a == action)
                && s.resource.iter().any(|r| glob_match(r, &arn))
        })
    }

    /// Whether listing `prefix` in `bucket` is allowed.
    pub fn allows_list(&self, bucket: &str, prefix: &str) -> bool {
        let arn = bucket_arn(bucket);
        self.statement.iter().any(|s| {
            let prefix_ok = match &s.condition {
                None => true,
                Some(condition) => condition
                    .string_like
                    .get(PREFIX_CONDITION_KEY)
                    .is_some_and(|patterns| patterns.iter().any(|p| glob_match(p, prefix))),
            };
            s.effect == Effect::Allow
                && s.action.iter().any(|a| a == ACTION_LIST_BUCKET)
                && s.resource.iter().any(|r| r == &arn)
                && prefix_ok
        })
    }
}

/// `*` matches any run of characters, everything else matches literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|b| *b == b'*')
}
