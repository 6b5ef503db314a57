//! Replace-all as key-set reconciliation.
//!
//! Making a stored collection equal to a new list is expressed as a plan:
//! delete every stored key absent from the new list, upsert every record in
//! it. Applying deletes and upserts in one batch never leaves a window in
//! which the collection reads empty.

use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ReconcileError {
    #[error("record at index {0} has no usable \"id\" field")]
    MissingKey(usize),
    #[error("duplicate record key {0:?}")]
    DuplicateKey(String),
}

/// Extract the record key from a JSON record. Numeric ids are stringified.
pub fn record_key(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Every record must carry a non-empty key, and keys must be unique.
pub fn check_keys(records: &[Value]) -> Result<(), ReconcileError> {
    let mut seen = HashSet::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let key = record_key(record).ok_or(ReconcileError::MissingKey(i))?;
        if !seen.insert(key.clone()) {
            return Err(ReconcileError::DuplicateKey(key));
        }
    }
    Ok(())
}

/// The minimal set of writes that turns the stored collection into `upserts`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Stored keys that are not in the new list, in sorted order.
    pub deletes: Vec<String>,
    /// Every record of the new list, keyed, in input order.
    pub upserts: Vec<(String, Value)>,
}

impl ReconcilePlan {
    /// Build a plan from the currently stored keys and the desired records.
    pub fn build<'a, I>(stored_keys: I, desired: Vec<Value>) -> Result<Self, ReconcileError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::with_capacity(desired.len());
        let mut upserts = Vec::with_capacity(desired.len());
        for (i, record) in desired.into_iter().enumerate() {
            let key = record_key(&record).ok_or(ReconcileError::MissingKey(i))?;
            if !seen.insert(key.clone()) {
                return Err(ReconcileError::DuplicateKey(key));
            }
            upserts.push((key, record));
        }

        let deletes: BTreeSet<String> = stored_keys
            .into_iter()
            .filter(|k| !seen.contains(*k))
            .map(str::to_owned)
            .collect();

        Ok(Self {
            deletes: deletes.into_iter().collect(),
            upserts,
        })
    }

    /// Number of individual writes the plan performs.
    pub fn write_count(&self) -> usize {
        self.deletes.len() + self.upserts.len()
    }

    /// Apply the plan to an in-memory list of records, preserving the order
    /// of the desired list.
    pub fn apply_to_list(self) -> Vec<Value> {
        self.upserts.into_iter().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_key_forms() {
        assert_eq!(record_key(&json!({"id": "abc"})), Some("abc".into()));
        assert_eq!(record_key(&json!({"id": 42})), Some("42".into()));
        assert_eq!(record_key(&json!({"id": ""})), None);
        assert_eq!(record_key(&json!({"name": "x"})), None);
        assert_eq!(record_key(&json!([1, 2])), None);
    }

    #[test]
    fn test_deletion_is_honoured() {
        let plan = ReconcilePlan::build(["a", "b"], vec![json!({"id": "b", "v": 2})]).unwrap();
        assert_eq!(plan.deletes, vec!["a".to_string()]);
        assert_eq!(plan.upserts.len(), 1);
        assert_eq!(plan.upserts[0].0, "b");
        assert_eq!(plan.write_count(), 2);
    }

    #[test]
    fn test_empty_list_deletes_everything() {
        let plan = ReconcilePlan::build(["c", "a", "b"], vec![]).unwrap();
        assert_eq!(plan.deletes, vec!["a", "b", "c"]);
        assert!(plan.upserts.is_empty());
    }

    #[test]
    fn test_fresh_store_only_upserts() {
        let plan =
            ReconcilePlan::build(std::iter::empty::<&str>(), vec![json!({"id": "x"}), json!({"id": 7})])
                .unwrap();
        assert!(plan.deletes.is_empty());
        let keys: Vec<_> = plan.upserts.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["x", "7"]);
    }

    #[test]
    fn test_rejects_missing_and_duplicate_keys() {
        assert_eq!(
            ReconcilePlan::build(["a"], vec![json!({"id": "a"}), json!({"v": 1})]),
            Err(ReconcileError::MissingKey(1))
        );
        assert_eq!(
            ReconcilePlan::build(["a"], vec![json!({"id": "a"}), json!({"id": "a"})]),
            Err(ReconcileError::DuplicateKey("a".into()))
        );
    }

    #[test]
    fn test_check_keys() {
        assert_eq!(check_keys(&[json!({"id": "a"}), json!({"id": 1})]), Ok(()));
        assert_eq!(
            check_keys(&[json!({"id": 1}), json!({"id": "1"})]),
            Err(ReconcileError::DuplicateKey("1".into()))
        );
    }

    #[test]
    fn test_apply_to_list_keeps_desired_order() {
        let plan = ReconcilePlan::build(
            ["z"],
            vec![json!({"id": "b"}), json!({"id": "a"})],
        )
        .unwrap();
        assert_eq!(plan.apply_to_list(), vec![json!({"id": "b"}), json!({"id": "a"})]);
    }
}
