use std::collections::BTreeMap;

use strvct_kv::KvValue;
use tracing::debug;

use crate::error::{AtomicError, AtomicResult};

/// Pending overlay: `None` marks a tombstone.
pub type Changes = BTreeMap<String, Option<KvValue>>;

/// In-memory snapshot plus a pending-changes overlay.
///
/// The snapshot is only ever written by [`commit`](Self::commit) (and by
/// [`load_snapshot`](Self::load_snapshot) before the map is opened).
#[derive(Clone, Debug)]
pub struct AtomicMap {
    snapshot: BTreeMap<String, KvValue>,
    changes: Option<Changes>,
    is_open: bool,
    strict_strings: bool,
}

impl Default for AtomicMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicMap {
    /// A closed, empty, strings-only map.
    pub fn new() -> Self {
        Self {
            snapshot: BTreeMap::new(),
            changes: None,
            is_open: false,
            strict_strings: true,
        }
    }

    /// Toggle the strings-only check on writes. Binary maps turn it off.
    pub fn with_strict_strings(mut self, strict: bool) -> Self {
        self.strict_strings = strict;
        self
    }

    pub fn strict_strings(&self) -> bool {
        self.strict_strings
    }

    // ---------------------------------------------------------------
    // Open / close
    // ---------------------------------------------------------------

    pub fn open(&mut self) {
        self.is_open = true;
    }

    /// Close the map. Not allowed mid-transaction.
    pub fn close(&mut self) -> AtomicResult<()> {
        self.assert_not_in_tx()?;
        self.is_open = false;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Replace the snapshot wholesale (used when loading from storage).
    pub fn load_snapshot(
        &mut self,
        entries: impl IntoIterator<Item = (String, KvValue)>,
    ) -> AtomicResult<()> {
        self.assert_not_in_tx()?;
        self.snapshot = entries.into_iter().collect();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    pub fn is_in_tx(&self) -> bool {
        self.changes.is_some()
    }

    /// Start a transaction with an empty overlay.
    pub fn begin(&mut self) -> AtomicResult<()> {
        self.assert_open()?;
        self.assert_not_in_tx()?;
        self.changes = Some(Changes::new());
        Ok(())
    }

    /// Fold the overlay into the snapshot and leave the transaction.
    ///
    /// Returns the number of changes applied.
    pub fn commit(&mut self) -> AtomicResult<usize> {
        let changes = self.changes.take().ok_or(AtomicError::NotInTransaction)?;
        let count = changes.len();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    self.snapshot.insert(key, value);
                }
                None => {
                    self.snapshot.remove(&key);
                }
            }
        }
        debug!(changes = count, "atomic map committed");
        Ok(count)
    }

    /// Discard the overlay; the snapshot is untouched.
    pub fn revert(&mut self) -> AtomicResult<()> {
        let changes = self.changes.take().ok_or(AtomicError::NotInTransaction)?;
        debug!(changes = changes.len(), "atomic map reverted");
        Ok(())
    }

    /// The pending overlay of the open transaction.
    pub fn pending_changes(&self) -> AtomicResult<&Changes> {
        self.changes.as_ref().ok_or(AtomicError::NotInTransaction)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Value for `key`, overlay first. A tombstone reads as absent.
    pub fn at(&self, key: &str) -> AtomicResult<Option<&KvValue>> {
        self.assert_open()?;
        if let Some(changes) = &self.changes {
            if let Some(pending) = changes.get(key) {
                return Ok(pending.as_ref());
            }
        }
        Ok(self.snapshot.get(key))
    }

    /// Text value for `key`, if present and textual.
    pub fn at_text(&self, key: &str) -> AtomicResult<Option<&str>> {
        Ok(self.at(key)?.and_then(KvValue::as_text))
    }

    pub fn has_key(&self, key: &str) -> AtomicResult<bool> {
        Ok(self.at(key)?.is_some())
    }

    /// Whether the committed snapshot holds `key`, ignoring the overlay.
    pub fn snapshot_has_key(&self, key: &str) -> bool {
        self.snapshot.contains_key(key)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Record a pending set.
    pub fn at_put(&mut self, key: &str, value: impl Into<KvValue>) -> AtomicResult<()> {
        let value = value.into();
        if key.is_empty() {
            return Err(AtomicError::InvalidKey(key.to_string()));
        }
        if self.strict_strings && !value.is_text() {
            return Err(AtomicError::NonStringValue(key.to_string()));
        }
        self.assert_open()?;
        let changes = self.changes.as_mut().ok_or(AtomicError::NotInTransaction)?;
        changes.insert(key.to_string(), Some(value));
        Ok(())
    }

    /// Record a pending removal (tombstone).
    pub fn remove_key(&mut self, key: &str) -> AtomicResult<()> {
        self.assert_open()?;
        let changes = self.changes.as_mut().ok_or(AtomicError::NotInTransaction)?;
        changes.insert(key.to_string(), None);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Enumeration (outside transactions only)
    // ---------------------------------------------------------------

    pub fn for_each_kv(&self, mut f: impl FnMut(&str, &KvValue)) -> AtomicResult<()> {
        self.assert_enumerable()?;
        for (k, v) in &self.snapshot {
            f(k, v);
        }
        Ok(())
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> AtomicResult<Vec<String>> {
        self.assert_enumerable()?;
        Ok(self.snapshot.keys().cloned().collect())
    }

    pub fn count(&self) -> AtomicResult<usize> {
        self.assert_enumerable()?;
        Ok(self.snapshot.len())
    }

    fn assert_open(&self) -> AtomicResult<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(AtomicError::NotOpen)
        }
    }

    fn assert_not_in_tx(&self) -> AtomicResult<()> {
        if self.is_in_tx() {
            Err(AtomicError::InTransaction)
        } else {
            Ok(())
        }
    }

    fn assert_enumerable(&self) -> AtomicResult<()> {
        self.assert_open()?;
        self.assert_not_in_tx()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_map() -> AtomicMap {
        let mut map = AtomicMap::new();
        map.open();
        map
    }

    #[test]
    fn put_then_commit() {
        let mut map = open_map();
        map.begin().unwrap();
        map.at_put("foo", "bar").unwrap();
        map.commit().unwrap();
        assert_eq!(map.count().unwrap(), 1);
        assert_eq!(map.at_text("foo").unwrap(), Some("bar"));
    }

    #[test]
    fn remove_then_commit() {
        let mut map = open_map();
        map.begin().unwrap();
        map.at_put("foo", "bar").unwrap();
        map.commit().unwrap();
        map.begin().unwrap();
        map.remove_key("foo").unwrap();
        map.commit().unwrap();
        assert_eq!(map.count().unwrap(), 0);
        assert!(!map.has_key("foo").unwrap());
    }

    #[test]
    fn tombstone_hides_snapshot_value_inside_tx() {
        let mut map = open_map();
        map.begin().unwrap();
        map.at_put("foo", "bar").unwrap();
        map.commit().unwrap();

        map.begin().unwrap();
        map.remove_key("foo").unwrap();
        assert!(!map.has_key("foo").unwrap());
        assert!(map.snapshot_has_key("foo"));
        map.revert().unwrap();
        assert!(map.has_key("foo").unwrap());
    }

    #[test]
    fn revert_discards_overlay() {
        let mut map = open_map();
        map.begin().unwrap();
        map.at_put("foo", "bar").unwrap();
        map.revert().unwrap();
        assert!(!map.is_in_tx());
        assert_eq!(map.count().unwrap(), 0);
    }

    #[test]
    fn commit_twice_fails() {
        let mut map = open_map();
        map.begin().unwrap();
        map.commit().unwrap();
        assert!(matches!(map.commit(), Err(AtomicError::NotInTransaction)));
        assert!(matches!(map.revert(), Err(AtomicError::NotInTransaction)));
    }

    #[test]
    fn nested_begin_fails() {
        let mut map = open_map();
        map.begin().unwrap();
        assert!(matches!(map.begin(), Err(AtomicError::InTransaction)));
    }

    #[test]
    fn writes_need_a_transaction() {
        let mut map = open_map();
        assert!(matches!(map.at_put("k", "v"), Err(AtomicError::NotInTransaction)));
        assert!(matches!(map.remove_key("k"), Err(AtomicError::NotInTransaction)));
    }

    #[test]
    fn enumeration_forbidden_inside_tx() {
        let mut map = open_map();
        map.begin().unwrap();
        assert!(matches!(map.count(), Err(AtomicError::InTransaction)));
        assert!(matches!(map.keys(), Err(AtomicError::InTransaction)));
        assert!(matches!(map.for_each_kv(|_, _| {}), Err(AtomicError::InTransaction)));
        assert!(matches!(map.close(), Err(AtomicError::InTransaction)));
    }

    #[test]
    fn strict_strings_rejects_binary() {
        let mut map = open_map();
        map.begin().unwrap();
        let err = map.at_put("k", vec![1u8, 2]).unwrap_err();
        assert!(matches!(err, AtomicError::NonStringValue(ref k) if k == "k"));

        let mut binary = AtomicMap::new().with_strict_strings(false);
        binary.open();
        binary.begin().unwrap();
        binary.at_put("k", vec![1u8, 2]).unwrap();
        binary.commit().unwrap();
        assert_eq!(binary.at("k").unwrap().map(KvValue::as_bytes), Some(&[1u8, 2][..]));
    }

    #[test]
    fn closed_map_rejects_access() {
        let mut map = AtomicMap::new();
        assert!(matches!(map.at("k"), Err(AtomicError::NotOpen)));
        assert!(matches!(map.begin(), Err(AtomicError::NotOpen)));
        map.open();
        map.close().unwrap();
        assert!(matches!(map.count(), Err(AtomicError::NotOpen)));
    }

    #[test]
    fn empty_key_rejected() {
        let mut map = open_map();
        map.begin().unwrap();
        assert!(matches!(map.at_put("", "v"), Err(AtomicError::InvalidKey(_))));
    }

    #[test]
    fn for_each_visits_sorted() {
        let mut map = open_map();
        map.load_snapshot([("b".to_string(), "2".into()), ("a".to_string(), "1".into())])
            .unwrap();
        let mut seen = Vec::new();
        map.for_each_kv(|k, v| seen.push(format!("{k}={}", v.as_text().unwrap())))
            .unwrap();
        assert_eq!(seen, vec!["a=1", "b=2"]);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Put(u8, u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            (0u8..8).prop_map(Op::Remove),
        ]
    }

    fn apply(map: &mut AtomicMap, model: &mut BTreeMap<String, String>, op: &Op) {
        match op {
            Op::Put(k, v) => {
                map.at_put(&format!("k{k}"), v.to_string()).unwrap();
                model.insert(format!("k{k}"), v.to_string());
            }
            Op::Remove(k) => {
                map.remove_key(&format!("k{k}")).unwrap();
                model.remove(&format!("k{k}"));
            }
        }
    }

    fn contents(map: &AtomicMap) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        map.for_each_kv(|k, v| {
            out.insert(k.to_string(), v.as_text().unwrap().to_string());
        })
        .unwrap();
        out
    }

    proptest! {
        #[test]
        fn committed_tx_matches_model(
            seed in proptest::collection::vec(op(), 0..16),
            ops in proptest::collection::vec(op(), 0..32),
        ) {
            let mut map = open_map();
            let mut model = BTreeMap::new();
            map.begin().unwrap();
            for o in &seed { apply(&mut map, &mut model, o); }
            map.commit().unwrap();

            map.begin().unwrap();
            for o in &ops {
                apply(&mut map, &mut model, o);
                // Reads inside the transaction see every write so far.
                for k in 0u8..8 {
                    let key = format!("k{k}");
                    prop_assert_eq!(map.at_text(&key).unwrap(), model.get(&key).map(String::as_str));
                }
            }
            map.commit().unwrap();
            prop_assert_eq!(contents(&map), model);
        }

        #[test]
        fn reverted_tx_leaves_snapshot_unchanged(
            seed in proptest::collection::vec(op(), 0..16),
            ops in proptest::collection::vec(op(), 0..32),
        ) {
            let mut map = open_map();
            let mut model = BTreeMap::new();
            map.begin().unwrap();
            for o in &seed { apply(&mut map, &mut model, o); }
            map.commit().unwrap();
            let before = contents(&map);

            map.begin().unwrap();
            let mut scratch = model.clone();
            for o in &ops { apply(&mut map, &mut scratch, o); }
            map.revert().unwrap();
            prop_assert_eq!(contents(&map), before);
        }
    }
}
