//! Name-keyed storage of every live data object.
//!
//! `DataStorage` enforces the naming rules, cross-type exclusivity and the
//! default sequence collection. It never talks to listeners itself: every
//! mutation returns the events it caused, in the order they must be
//! delivered, and the engine fans them out after releasing its lock.

use crate::{
    data::{Collection, DataKind, DataObject, TEMPORARY_PREFIX},
    error::EngineError,
    notify::DataEvent,
};
use regex::Regex;
use std::collections::HashMap;

pub const DEFAULT_SEQUENCE_COLLECTION: &str = "AllSequences";

/// Protocol keywords that can never be used as data names.
pub const RESERVED_NAMES: &[&str] = &[
    "in", "from", "to", "with", "where", "as", "do", "and", "or", "not", "true", "false", "null",
];

const SEQUENCE_EXTRA_CHARS: &[char] = &['.', '-', '+', '(', ')', '[', ']'];

pub fn validate_name(name: &str, kind: DataKind) -> Result<(), EngineError> {
    let core = name.strip_prefix(TEMPORARY_PREFIX).unwrap_or(name);
    if core.is_empty() {
        return Err(EngineError::invalid_name(name, "names can not be empty"));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(core)) {
        return Err(EngineError::invalid_name(name, "this is a reserved word"));
    }
    let is_sequence = kind == DataKind::Sequence;
    let first = core.chars().next().unwrap_or_default();
    if is_sequence {
        if !first.is_ascii_alphanumeric() {
            return Err(EngineError::invalid_name(
                name,
                "sequence names must start with a letter or a digit",
            ));
        }
    } else if !first.is_ascii_alphabetic() {
        return Err(EngineError::invalid_name(name, "names must start with a letter"));
    }
    if let Some(bad) = core.chars().find(|c| {
        !(c.is_ascii_alphanumeric()
            || *c == '_'
            || (is_sequence && SEQUENCE_EXTRA_CHARS.contains(c)))
    }) {
        return Err(EngineError::invalid_name(
            name,
            format!("the character '{bad}' is not allowed"),
        ));
    }
    Ok(())
}

/// A `prefix[a-b]suffix` token naming a numbered series of objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRange {
    pub prefix: String,
    pub from: u64,
    pub to: u64,
    pub suffix: String,
}

impl NameRange {
    pub fn parse(token: &str) -> Option<Self> {
        let open = token.find('[')?;
        let close = open + token[open..].find(']')?;
        let (from, to) = token[open + 1..close].split_once('-')?;
        let from = from.trim().parse::<u64>().ok()?;
        let to = to.trim().parse::<u64>().ok()?;
        Some(Self {
            prefix: token[..open].to_string(),
            from: from.min(to),
            to: from.max(to),
            suffix: token[close + 1..].to_string(),
        })
    }
}

pub struct DataStorage {
    objects: HashMap<String, DataObject>,
    default_collection_name: String,
    updates_allowed: bool,
}

impl Default for DataStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStorage {
    pub fn new() -> Self {
        Self::with_default_collection(DEFAULT_SEQUENCE_COLLECTION)
    }

    pub fn with_default_collection(name: &str) -> Self {
        let mut objects = HashMap::new();
        objects.insert(
            name.to_string(),
            DataObject::SequenceCollection(Collection::new(name)),
        );
        Self {
            objects,
            default_collection_name: name.to_string(),
            updates_allowed: true,
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataObject> {
        self.objects.get(name)
    }

    /// Absence and a kind mismatch look the same to the caller.
    pub fn get_of_kind(&self, name: &str, kind: DataKind) -> Option<&DataObject> {
        self.objects.get(name).filter(|o| o.kind() == kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataObject> {
        self.objects.values()
    }

    pub fn default_collection_name(&self) -> &str {
        &self.default_collection_name
    }

    pub fn default_collection(&self) -> &Collection {
        self.objects
            .get(&self.default_collection_name)
            .and_then(DataObject::as_collection)
            .unwrap_or_else(|| unreachable!("the default sequence collection always exists"))
    }

    fn default_collection_mut(&mut self) -> &mut Collection {
        self.objects
            .get_mut(&self.default_collection_name)
            .and_then(DataObject::as_collection_mut)
            .unwrap_or_else(|| unreachable!("the default sequence collection always exists"))
    }

    fn default_collection_object(&self) -> DataObject {
        DataObject::SequenceCollection(self.default_collection().clone())
    }

    pub fn updates_allowed(&self) -> bool {
        self.updates_allowed
    }

    pub fn set_updates_allowed(&mut self, allowed: bool) {
        self.updates_allowed = allowed;
    }

    fn check_mutable(&self) -> Result<(), EngineError> {
        if self.updates_allowed {
            Ok(())
        } else {
            Err(EngineError::UpdatesDisabled)
        }
    }

    fn is_default_collection(&self, name: &str) -> bool {
        name == self.default_collection_name
    }

    /// Drops collection members that do not name an object of the member kind.
    fn prune_members(&self, object: &mut DataObject) {
        let Some(member_kind) = object.kind().member_kind() else {
            return;
        };
        let name = object.name().to_string();
        if let Some(collection) = object.as_collection_mut() {
            let dropped = collection
                .retain_members(|m| self.get_of_kind(m, member_kind).is_some());
            if !dropped.is_empty() {
                tracing::warn!(
                    collection = %name,
                    dropped = ?dropped,
                    "collection members do not resolve to a {member_kind}"
                );
            }
        }
    }

    /// Takes `old` out of every collection that lists it. The default
    /// collection is reported first, the rest by name.
    fn removal_events(&mut self, old: &DataObject) -> Vec<DataEvent> {
        let mut events = Vec::new();
        if let Some(collection_kind) = old.kind().collection_kind() {
            let mut touched = Vec::new();
            for o in self.objects.values_mut().filter(|o| o.kind() == collection_kind) {
                let name = o.name().to_string();
                if o.as_collection_mut().is_some_and(|c| c.remove(old.name())) {
                    touched.push(name);
                }
            }
            touched.sort_by(|a, b| {
                self.is_default_collection(b)
                    .cmp(&self.is_default_collection(a))
                    .then_with(|| a.cmp(b))
            });
            for name in touched {
                if let Some(collection) = self.objects.get(&name) {
                    events.push(DataEvent::RemovedFromSet {
                        collection: collection.clone(),
                        members: vec![old.clone()],
                    });
                }
            }
        }
        events.push(DataEvent::Removed(old.clone()));
        events
    }

    pub fn store(&mut self, object: DataObject) -> Result<Vec<DataEvent>, EngineError> {
        self.check_mutable()?;
        validate_name(object.name(), object.kind())?;
        let name = object.name().to_string();

        if self.is_default_collection(&name) {
            if object.kind() != DataKind::SequenceCollection {
                return Err(EngineError::TypeConflict {
                    name,
                    existing: DataKind::SequenceCollection,
                    incoming: object.kind(),
                });
            }
            let members = object
                .as_collection()
                .map(|c| c.members().to_vec())
                .unwrap_or_default();
            return Ok(self.add_to_default_collection(&members));
        }

        if let Some(existing) = self.objects.get(&name) {
            if existing.kind() != object.kind() && existing.kind().is_identity_bearing() {
                return Err(EngineError::TypeConflict {
                    name,
                    existing: existing.kind(),
                    incoming: object.kind(),
                });
            }
        }

        let mut object = object;
        self.prune_members(&mut object);

        let mut events = Vec::new();
        match self.objects.remove(&name) {
            // Same-kind replacement keeps its collection memberships.
            Some(old) if old.kind() == object.kind() => events.push(DataEvent::Removed(old)),
            Some(old) => events.extend(self.removal_events(&old)),
            None => {}
        }
        if object.kind() == DataKind::Sequence && self.default_collection_mut().add(name.clone()) {
            events.push(DataEvent::AddedToSet {
                collection: self.default_collection_object(),
                members: vec![object.clone()],
            });
        }
        events.push(DataEvent::Added(object.clone()));
        self.objects.insert(name, object);
        Ok(events)
    }

    fn add_to_default_collection(&mut self, members: &[String]) -> Vec<DataEvent> {
        let added: Vec<DataObject> = members
            .iter()
            .filter_map(|m| self.get_of_kind(m, DataKind::Sequence).cloned())
            .collect();
        let collection = self.default_collection_mut();
        let added: Vec<DataObject> = added
            .into_iter()
            .filter(|s| collection.add(s.name()))
            .collect();
        if added.is_empty() {
            return Vec::new();
        }
        vec![DataEvent::AddedToSet {
            collection: self.default_collection_object(),
            members: added,
        }]
    }

    /// Checks that `object` may be merged into its namesake and returns the current value.
    pub fn check_update(&self, object: &DataObject) -> Result<DataObject, EngineError> {
        self.check_mutable()?;
        let name = object.name();
        let existing = self
            .objects
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        if self.is_default_collection(name) {
            let is_reorder = object.kind() == DataKind::SequenceCollection
                && object
                    .as_collection()
                    .is_some_and(|c| self.default_collection().is_permutation(c.members()));
            if !is_reorder {
                return Err(EngineError::Protected(format!(
                    "The members of '{name}' follow the loaded sequences and can only be reordered"
                )));
            }
        } else if !existing.kind().can_convert_to(object.kind()) {
            return Err(EngineError::Merge(crate::data::MergeError::Incompatible {
                target: existing.kind(),
                source_kind: object.kind(),
            }));
        }
        Ok(existing.clone())
    }

    pub fn update(&mut self, object: DataObject) -> Result<Vec<DataEvent>, EngineError> {
        self.check_update(&object)?;
        let name = object.name().to_string();
        if self.is_default_collection(&name) {
            let order = object
                .as_collection()
                .map(|c| c.members().to_vec())
                .unwrap_or_default();
            return self.reorder(&name, order);
        }
        let mut object = object;
        self.prune_members(&mut object);
        let Some(slot) = self.objects.get_mut(&name) else {
            return Err(EngineError::NotFound(name));
        };
        if slot.kind() == object.kind() {
            slot.merge(object)?;
        } else {
            *slot = object;
        }
        Ok(vec![DataEvent::Updated(slot.clone())])
    }

    pub fn remove(&mut self, name: &str) -> Result<(Option<DataObject>, Vec<DataEvent>), EngineError> {
        self.check_mutable()?;
        if self.is_default_collection(name) {
            return Err(EngineError::Protected(format!(
                "'{name}' is the default sequence collection and can not be deleted"
            )));
        }
        let Some(old) = self.objects.remove(name) else {
            return Ok((None, Vec::new()));
        };
        let events = self.removal_events(&old);
        Ok((Some(old), events))
    }

    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<Vec<DataEvent>, EngineError> {
        self.check_mutable()?;
        let kind = self
            .objects
            .get(old_name)
            .map(DataObject::kind)
            .ok_or_else(|| EngineError::NotFound(old_name.to_string()))?;
        if old_name == new_name {
            return Ok(Vec::new());
        }
        validate_name(new_name, kind)?;
        if self.objects.contains_key(new_name) {
            return Err(EngineError::invalid_name(new_name, "the name is already in use"));
        }

        let Some(mut object) = self.objects.remove(old_name) else {
            return Err(EngineError::NotFound(old_name.to_string()));
        };
        object.set_name(new_name);
        self.objects.insert(new_name.to_string(), object.clone());
        if self.is_default_collection(old_name) {
            self.default_collection_name = new_name.to_string();
        }

        let mut events = Vec::new();
        if let Some(collection_kind) = kind.collection_kind() {
            let mut touched = Vec::new();
            for o in self.objects.values_mut().filter(|o| o.kind() == collection_kind) {
                if o
                    .as_collection_mut()
                    .is_some_and(|c| c.rename_member(old_name, new_name))
                {
                    touched.push(o.name().to_string());
                }
            }
            touched.sort();
            for name in touched {
                if let Some(collection) = self.objects.get(&name) {
                    events.push(DataEvent::Updated(collection.clone()));
                }
            }
        }
        events.push(DataEvent::Renamed {
            old_name: old_name.to_string(),
            data: object,
        });
        Ok(events)
    }

    pub fn reorder(&mut self, name: &str, order: Vec<String>) -> Result<Vec<DataEvent>, EngineError> {
        self.check_mutable()?;
        let collection = self
            .objects
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?
            .as_collection_mut()
            .ok_or_else(|| EngineError::InvalidInput(format!("'{name}' is not a collection")))?;
        if !collection.is_permutation(&order) {
            return Err(EngineError::InvalidInput(format!(
                "The new order for '{name}' must list exactly its current members"
            )));
        }
        let old_order = collection.members().to_vec();
        if old_order == order {
            return Ok(Vec::new());
        }
        collection.set_members(order);
        let collection = self
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        Ok(vec![DataEvent::OrderChanged {
            collection,
            old_order,
        }])
    }

    /// Restores a saved ordering of the default collection. Unknown names are
    /// skipped and members missing from `order` keep their relative position
    /// at the end.
    pub fn restore_default_order(&mut self, order: &[String]) {
        let collection = self.default_collection_mut();
        let mut members: Vec<String> = Vec::with_capacity(collection.len());
        for m in order {
            if collection.contains(m) && !members.contains(m) {
                members.push(m.clone());
            }
        }
        for m in collection.members() {
            if !members.contains(m) {
                members.push(m.clone());
            }
        }
        collection.set_members(members);
    }

    pub fn all_of_kind(&self, kind: DataKind) -> Vec<&DataObject> {
        let mut out: Vec<&DataObject> = self.objects.values().filter(|o| o.kind() == kind).collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    pub fn names_of_kind(&self, kind: DataKind) -> Vec<String> {
        self.all_of_kind(kind)
            .into_iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    /// Objects of `kind` whose whole name matches the regular expression `pattern`.
    pub fn matching(&self, kind: DataKind, pattern: &str) -> Result<Vec<&DataObject>, EngineError> {
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| EngineError::InvalidInput(format!("Invalid name pattern '{pattern}': {e}")))?;
        Ok(self
            .all_of_kind(kind)
            .into_iter()
            .filter(|o| re.is_match(o.name()))
            .collect())
    }

    /// Objects of `kind` named `prefix<number>suffix` with `from <= number <= to`,
    /// ordered by number.
    pub fn in_numeric_range(
        &self,
        kind: DataKind,
        prefix: &str,
        suffix: &str,
        from: u64,
        to: u64,
    ) -> Vec<&DataObject> {
        let pattern = format!("^{}([0-9]+){}$", regex::escape(prefix), regex::escape(suffix));
        let Ok(re) = Regex::new(&pattern) else {
            return Vec::new();
        };
        let mut hits: Vec<(u64, &DataObject)> = self
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .filter_map(|o| {
                let number = re.captures(o.name())?.get(1)?.as_str().parse::<u64>().ok()?;
                (from..=to).contains(&number).then_some((number, o))
            })
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name().cmp(b.1.name())));
        hits.into_iter().map(|(_, o)| o).collect()
    }

    /// Members of a collection that currently resolve, in collection order.
    pub fn resolve_members(&self, collection_name: &str) -> Vec<&DataObject> {
        let Some(object) = self.objects.get(collection_name) else {
            return Vec::new();
        };
        let (Some(collection), Some(member_kind)) =
            (object.as_collection(), object.kind().member_kind())
        else {
            return Vec::new();
        };
        collection
            .members()
            .iter()
            .filter_map(|m| self.get_of_kind(m, member_kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Module, Motif, NumericVariable, Sequence};

    fn seq(name: &str) -> DataObject {
        DataObject::Sequence(Sequence::new(name, "chr1", 100, 200))
    }

    fn snapshot(storage: &DataStorage) -> Vec<DataObject> {
        let mut all: Vec<DataObject> = storage.iter().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("ENSG0001", DataKind::Motif).is_ok());
        assert!(validate_name("motif_1", DataKind::Motif).is_ok());
        assert!(validate_name("", DataKind::Motif).is_err());
        assert!(validate_name("1abc", DataKind::Motif).is_err());
        assert!(validate_name("1abc", DataKind::Sequence).is_ok());
        assert!(validate_name("NM_001(+)[2].x-y", DataKind::Sequence).is_ok());
        assert!(validate_name("a.b", DataKind::Motif).is_err());
        assert!(validate_name("with", DataKind::TextVariable).is_err());
        assert!(validate_name("WITH", DataKind::TextVariable).is_err());
        assert!(validate_name("_temp_x1", DataKind::NumericVariable).is_ok());
        assert!(validate_name("_x1", DataKind::NumericVariable).is_err());
    }

    #[test]
    fn test_store_sequence_updates_default_collection_first() {
        let mut storage = DataStorage::new();
        let events = storage.store(seq("seq1")).unwrap();
        assert_eq!(storage.default_collection().members(), &["seq1".to_string()]);
        assert!(matches!(events[0], DataEvent::AddedToSet { .. }));
        assert!(matches!(events[1], DataEvent::Added(_)));
    }

    #[test]
    fn test_identity_bearing_names_are_exclusive() {
        let mut storage = DataStorage::new();
        storage
            .store(DataObject::Motif(Motif::from_consensus("X", "ACGT")))
            .unwrap();
        let before = snapshot(&storage);
        let err = storage
            .store(DataObject::Module(Module::new("X", vec!["X".to_string()])))
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeConflict { .. }));
        assert_eq!(snapshot(&storage), before);
        assert_eq!(storage.get("X").map(DataObject::kind), Some(DataKind::Motif));
    }

    #[test]
    fn test_plain_variables_can_be_replaced_by_other_kinds() {
        let mut storage = DataStorage::new();
        storage
            .store(DataObject::NumericVariable(NumericVariable::new("X", 1.0)))
            .unwrap();
        let events = storage
            .store(DataObject::Motif(Motif::from_consensus("X", "ACGT")))
            .unwrap();
        assert!(matches!(events[0], DataEvent::Removed(_)));
        assert_eq!(storage.get("X").map(DataObject::kind), Some(DataKind::Motif));
    }

    #[test]
    fn test_updates_disabled_blocks_every_mutation() {
        let mut storage = DataStorage::new();
        storage.store(seq("seq1")).unwrap();
        storage.set_updates_allowed(false);
        let before = snapshot(&storage);
        assert!(matches!(storage.remove("seq1"), Err(EngineError::UpdatesDisabled)));
        assert!(matches!(storage.store(seq("seq2")), Err(EngineError::UpdatesDisabled)));
        assert!(matches!(storage.update(seq("seq1")), Err(EngineError::UpdatesDisabled)));
        assert!(matches!(
            storage.rename("seq1", "seq9"),
            Err(EngineError::UpdatesDisabled)
        ));
        assert_eq!(snapshot(&storage), before);
    }

    #[test]
    fn test_store_default_collection_name_merges_members() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        storage.store(seq("b")).unwrap();
        storage.store(seq("c")).unwrap();
        storage.reorder(DEFAULT_SEQUENCE_COLLECTION, vec!["c".into(), "b".into(), "a".into()]).unwrap();
        let events = storage
            .store(DataObject::SequenceCollection(Collection::with_members(
                DEFAULT_SEQUENCE_COLLECTION,
                ["a", "missing"],
            )))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(storage.default_collection().len(), 3);
        assert_eq!(storage.default_collection().members()[0], "c");
    }

    #[test]
    fn test_default_collection_is_protected() {
        let mut storage = DataStorage::new();
        assert!(matches!(
            storage.remove(DEFAULT_SEQUENCE_COLLECTION),
            Err(EngineError::Protected(_))
        ));
        storage.store(seq("a")).unwrap();
        let replacement =
            DataObject::SequenceCollection(Collection::with_members(DEFAULT_SEQUENCE_COLLECTION, ["x"]));
        assert!(matches!(storage.update(replacement), Err(EngineError::Protected(_))));
    }

    #[test]
    fn test_remove_sequence_excises_from_default_collection() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        let (removed, events) = storage.remove("a").unwrap();
        assert!(removed.is_some());
        assert!(storage.default_collection().is_empty());
        assert!(matches!(events[0], DataEvent::RemovedFromSet { .. }));
        assert!(matches!(events[1], DataEvent::Removed(_)));
        let (removed, events) = storage.remove("a").unwrap();
        assert!(removed.is_none());
        assert!(events.is_empty());
    }

    #[test]
    fn test_remove_excises_from_every_collection() {
        let mut storage = DataStorage::new();
        storage.store(seq("seq1")).unwrap();
        storage.store(seq("seq2")).unwrap();
        for set in ["Set2", "Set1"] {
            storage
                .store(DataObject::SequenceCollection(Collection::with_members(
                    set,
                    ["seq1", "seq2"],
                )))
                .unwrap();
        }
        let (_, events) = storage.remove("seq1").unwrap();
        let touched: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                DataEvent::RemovedFromSet { collection, .. } => Some(collection.name()),
                _ => None,
            })
            .collect();
        assert_eq!(touched, vec![DEFAULT_SEQUENCE_COLLECTION, "Set1", "Set2"]);
        assert!(matches!(events.last(), Some(DataEvent::Removed(_))));
        for set in ["Set1", "Set2"] {
            assert_eq!(
                storage.get(set).and_then(DataObject::as_collection).map(Collection::members),
                Some(&["seq2".to_string()][..])
            );
        }
    }

    #[test]
    fn test_rename_after_remove_keeps_members_unique() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        storage.store(seq("b")).unwrap();
        storage
            .store(DataObject::SequenceCollection(Collection::with_members("Set1", ["a", "b"])))
            .unwrap();
        storage.remove("a").unwrap();
        storage.rename("b", "a").unwrap();
        assert_eq!(
            storage.get("Set1").and_then(DataObject::as_collection).map(Collection::members),
            Some(&["a".to_string()][..])
        );
        let resolved: Vec<&str> = storage.resolve_members("Set1").iter().map(|o| o.name()).collect();
        assert_eq!(resolved, vec!["a"]);
    }

    #[test]
    fn test_same_kind_replacement_keeps_memberships() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        storage.store(seq("b")).unwrap();
        storage
            .store(DataObject::SequenceCollection(Collection::with_members("Set1", ["a"])))
            .unwrap();
        let events = storage
            .store(DataObject::Sequence(Sequence::new("a", "chr9", 5, 10)))
            .unwrap();
        assert!(matches!(events[0], DataEvent::Removed(_)));
        assert!(matches!(events[1], DataEvent::Added(_)));
        assert_eq!(
            storage.default_collection().members(),
            &["a".to_string(), "b".to_string()]
        );
        assert!(storage.get("Set1").and_then(DataObject::as_collection).unwrap().contains("a"));
    }

    #[test]
    fn test_collections_drop_unresolved_members() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        storage
            .store(DataObject::SequenceCollection(Collection::with_members(
                "Set1",
                ["a", "ghost"],
            )))
            .unwrap();
        let members: Vec<&str> = storage.resolve_members("Set1").iter().map(|o| o.name()).collect();
        assert_eq!(members, vec!["a"]);
        assert_eq!(
            storage.get("Set1").and_then(DataObject::as_collection).map(Collection::len),
            Some(1)
        );
    }

    #[test]
    fn test_update_merges_in_place_and_checks_kinds() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        let mut replacement = Sequence::new("a", "chr5", 1, 50);
        replacement.gene_name = Some("FOS".to_string());
        storage.update(DataObject::Sequence(replacement)).unwrap();
        match storage.get("a") {
            Some(DataObject::Sequence(s)) => {
                assert_eq!(s.chromosome, "chr5");
                assert_eq!(s.gene_name.as_deref(), Some("FOS"));
            }
            other => panic!("unexpected object {other:?}"),
        }
        let err = storage
            .update(DataObject::Motif(Motif::from_consensus("a", "AC")))
            .unwrap_err();
        assert!(matches!(err, EngineError::Merge(_)));
        assert!(matches!(
            storage.update(seq("nope")),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_converts_plain_variables() {
        let mut storage = DataStorage::new();
        storage
            .store(DataObject::NumericVariable(NumericVariable::new("v", 1.0)))
            .unwrap();
        storage
            .update(DataObject::TextVariable(crate::data::TextVariable::new(
                "v",
                vec!["x".to_string()],
            )))
            .unwrap();
        assert_eq!(storage.get("v").map(DataObject::kind), Some(DataKind::TextVariable));
    }

    #[test]
    fn test_rename_rekeys_and_updates_collections() {
        let mut storage = DataStorage::new();
        storage.store(seq("a")).unwrap();
        storage
            .store(DataObject::SequenceCollection(Collection::with_members("Set1", ["a"])))
            .unwrap();
        let events = storage.rename("a", "b").unwrap();
        assert!(storage.get("a").is_none());
        assert_eq!(storage.get("b").map(DataObject::name), Some("b"));
        assert!(storage.default_collection().contains("b"));
        assert!(storage.get("Set1").and_then(DataObject::as_collection).unwrap().contains("b"));
        assert!(matches!(events.last(), Some(DataEvent::Renamed { .. })));

        storage.rename(DEFAULT_SEQUENCE_COLLECTION, "Everything").unwrap();
        assert_eq!(storage.default_collection_name(), "Everything");
        assert!(storage.default_collection().contains("b"));

        assert!(storage.rename("b", "Set1").is_err());
        assert!(storage.rename("b", "bad name").is_err());
    }

    #[test]
    fn test_bulk_queries() {
        let mut storage = DataStorage::new();
        for name in ["seq10", "seq2", "seq1", "seq3x", "other"] {
            storage.store(seq(name)).unwrap();
        }
        assert_eq!(
            storage.names_of_kind(DataKind::Sequence),
            vec!["other", "seq1", "seq10", "seq2", "seq3x"]
        );
        let matched: Vec<&str> = storage
            .matching(DataKind::Sequence, "seq[0-9]+")
            .unwrap()
            .iter()
            .map(|o| o.name())
            .collect();
        assert_eq!(matched, vec!["seq1", "seq10", "seq2"]);
        assert!(storage.matching(DataKind::Sequence, "(").is_err());

        let ranged: Vec<&str> = storage
            .in_numeric_range(DataKind::Sequence, "seq", "", 2, 10)
            .iter()
            .map(|o| o.name())
            .collect();
        assert_eq!(ranged, vec!["seq2", "seq10"]);
        let ranged: Vec<&str> = storage
            .in_numeric_range(DataKind::Sequence, "seq", "x", 1, 5)
            .iter()
            .map(|o| o.name())
            .collect();
        assert_eq!(ranged, vec!["seq3x"]);
    }

    #[test]
    fn test_name_range_parse() {
        assert_eq!(
            NameRange::parse("seq[10-2]_up"),
            Some(NameRange {
                prefix: "seq".to_string(),
                from: 2,
                to: 10,
                suffix: "_up".to_string()
            })
        );
        assert_eq!(NameRange::parse("seq1"), None);
        assert_eq!(NameRange::parse("seq[a-b]"), None);
    }

    #[test]
    fn test_restore_default_order() {
        let mut storage = DataStorage::new();
        for name in ["a", "b", "c"] {
            storage.store(seq(name)).unwrap();
        }
        storage.restore_default_order(&["c".to_string(), "zz".to_string(), "a".to_string()]);
        assert_eq!(
            storage.default_collection().members(),
            &["c".to_string(), "a".to_string(), "b".to_string()]
        );
    }
}
