use super::engine::{ReplaceOutcome, StoredDocument};
use crate::core::{RepoError, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Change produced by a mutation, waiting to be written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(String),
    Remove(String),
    Clear,
}

/// What a document looked like before the first uncommitted change to it.
#[derive(Debug, Clone)]
enum Undo {
    Absent(String),
    Present(StoredDocument),
    Cleared(HashMap<String, StoredDocument>),
}

/// One named set of documents, keyed by id.
///
/// Mutations are provisional until [`Collection::commit`]; until then
/// [`Collection::rollback`] puts every touched document back.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    documents: HashMap<String, StoredDocument>,
    next_seq: u64,
    pending: Vec<Change>,
    undo: Vec<Undo>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn scan(&self) -> Vec<StoredDocument> {
        let mut documents: Vec<StoredDocument> = self.documents.values().cloned().collect();
        documents.sort_by_key(|doc| doc.seq);
        documents
    }

    pub fn insert(&mut self, id: &str, body: Value) -> Result<StoredDocument> {
        if self.documents.contains_key(id) {
            return Err(RepoError::validation(format!("duplicate id '{}'", id)));
        }
        Ok(self.put_new(id, body))
    }

    pub fn insert_batch(&mut self, documents: Vec<(String, Value)>) -> Result<Vec<StoredDocument>> {
        let mut seen = HashSet::new();
        for (id, _) in &documents {
            if self.documents.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(RepoError::validation(format!("duplicate id '{}'", id)));
            }
        }
        Ok(documents
            .into_iter()
            .map(|(id, body)| self.put_new(&id, body))
            .collect())
    }

    pub fn replace(&mut self, id: &str, expected_version: u64, body: Value) -> ReplaceOutcome {
        let Some(doc) = self.documents.get_mut(id) else {
            return ReplaceOutcome::Missing;
        };
        if doc.version != expected_version {
            return ReplaceOutcome::VersionMismatch {
                actual: doc.version,
            };
        }
        let before = doc.clone();
        doc.version = expected_version + 1;
        doc.body = body;
        let version = doc.version;
        self.pending.push(Change::Put(id.to_string()));
        self.undo.push(Undo::Present(before));
        ReplaceOutcome::Replaced(version)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.documents.remove(id) {
            Some(doc) => {
                self.pending.push(Change::Remove(id.to_string()));
                self.undo.push(Undo::Present(doc));
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> u64 {
        let removed = std::mem::take(&mut self.documents);
        let count = removed.len() as u64;
        self.pending.push(Change::Clear);
        self.undo.push(Undo::Cleared(removed));
        count
    }

    /// Changes recorded since the last commit or rollback.
    pub fn changes(&self) -> &[Change] {
        &self.pending
    }

    /// Makes the recorded changes permanent.
    pub fn commit(&mut self) {
        self.pending.clear();
        self.undo.clear();
    }

    /// Puts back every document changed since the last commit.
    pub fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Absent(id) => {
                    self.documents.remove(&id);
                }
                Undo::Present(doc) => {
                    self.documents.insert(doc.id.clone(), doc);
                }
                Undo::Cleared(documents) => self.documents = documents,
            }
        }
        self.pending.clear();
    }

    /// Re-applies a logged document without recording a change.
    pub(crate) fn restore(&mut self, document: StoredDocument) {
        self.next_seq = self.next_seq.max(document.seq + 1);
        self.documents.insert(document.id.clone(), document);
    }

    pub(crate) fn forget(&mut self, id: &str) {
        self.documents.remove(id);
    }

    pub(crate) fn reset(&mut self) {
        self.documents.clear();
    }

    fn put_new(&mut self, id: &str, body: Value) -> StoredDocument {
        let doc = StoredDocument {
            id: id.to_string(),
            version: 1,
            seq: self.next_seq,
            body,
        };
        self.next_seq += 1;
        self.documents.insert(doc.id.clone(), doc.clone());
        self.pending.push(Change::Put(doc.id.clone()));
        self.undo.push(Undo::Absent(doc.id.clone()));
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_keeps_insertion_order() {
        let mut collection = Collection::new();
        for id in ["c", "a", "b"] {
            collection.insert(id, json!({"id": id})).unwrap();
        }
        let ids: Vec<String> = collection.scan().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn replace_checks_the_version() {
        let mut collection = Collection::new();
        let doc = collection.insert("x", json!({"n": 1})).unwrap();
        assert_eq!(doc.version, 1);

        assert_eq!(collection.replace("x", 1, json!({"n": 2})), ReplaceOutcome::Replaced(2));
        assert_eq!(
            collection.replace("x", 1, json!({"n": 3})),
            ReplaceOutcome::VersionMismatch { actual: 2 }
        );
        assert_eq!(collection.replace("y", 1, json!({})), ReplaceOutcome::Missing);
        assert_eq!(collection.get("x").unwrap().body, json!({"n": 2}));
    }

    #[test]
    fn batch_with_duplicate_inserts_nothing() {
        let mut collection = Collection::new();
        collection.insert("a", json!({})).unwrap();
        let err = collection
            .insert_batch(vec![("b".into(), json!({})), ("a".into(), json!({}))])
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert_eq!(collection.len(), 1);

        let err = collection
            .insert_batch(vec![("c".into(), json!({})), ("c".into(), json!({}))])
            .unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn mutations_record_changes() {
        let mut collection = Collection::new();
        collection.insert("a", json!({})).unwrap();
        collection.remove("a");
        collection.remove("a");
        collection.clear();
        assert_eq!(
            collection.changes(),
            [Change::Put("a".into()), Change::Remove("a".into()), Change::Clear]
        );
        collection.commit();
        assert!(collection.changes().is_empty());
    }

    #[test]
    fn rollback_restores_the_last_commit() {
        let mut collection = Collection::new();
        collection.insert("a", json!({"n": 1})).unwrap();
        collection.insert("b", json!({"n": 1})).unwrap();
        collection.commit();

        collection.replace("a", 1, json!({"n": 2}));
        collection.replace("a", 2, json!({"n": 3}));
        collection.remove("b");
        collection.insert("c", json!({})).unwrap();
        collection.clear();
        collection.insert("d", json!({})).unwrap();
        collection.rollback();

        assert!(collection.changes().is_empty());
        assert_eq!(collection.len(), 2);
        let a = collection.get("a").unwrap();
        assert_eq!((a.version, &a.body), (1, &json!({"n": 1})));
        assert!(collection.get("b").is_some());
        assert!(collection.get("c").is_none());
        assert!(collection.get("d").is_none());
        let ids: Vec<String> = collection.scan().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
