//! Change events: the public shape a subscriber actually sees, and the
//! mapping from a raw [`OplogEntry`].

use lauradb_common::{OpType, OplogEntry, ResumeToken};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    CreateCollection,
    DropCollection,
    CreateIndex,
    DropIndex,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDescription {
    pub updated_fields: Map<String, Value>,
    pub removed_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation_type: OperationType,
    pub database: String,
    pub collection: String,
    pub document_key: Value,
    pub full_document: Option<Value>,
    pub update_description: Option<UpdateDescription>,
    pub index_definition: Option<Value>,
    pub resume_token: ResumeToken,
}

impl ChangeEvent {
    /// The synthetic `{operationType, database, collection, fullDocument,
    /// documentKey}` view a user-supplied filter predicate is evaluated
    /// against.
    pub fn as_filter_view(&self) -> Value {
        serde_json::json!({
            "operationType": self.operation_type,
            "database": self.database,
            "collection": self.collection,
            "fullDocument": self.full_document,
            "documentKey": self.document_key,
        })
    }
}

/// Maps one oplog entry to a change event, or `None` for ops that carry no
/// event (currently only no-ops).
pub fn map_entry(entry: &OplogEntry) -> Option<ChangeEvent> {
    let document_key = |doc_id: &Option<String>| {
        serde_json::json!({ "_id": doc_id.clone().unwrap_or_default() })
    };

    let (operation_type, document_key, full_document, update_description, index_definition) =
        match entry.op_type {
            OpType::Insert => (
                OperationType::Insert,
                document_key(&entry.doc_id),
                entry.document.clone(),
                None,
                None,
            ),
            OpType::Update => (
                OperationType::Update,
                document_key(&entry.doc_id),
                None,
                Some(derive_update_description(entry.update.as_ref())),
                None,
            ),
            OpType::Delete => (
                OperationType::Delete,
                document_key(&entry.doc_id),
                None,
                None,
                None,
            ),
            OpType::CreateCollection => (
                OperationType::CreateCollection,
                Value::Null,
                None,
                None,
                None,
            ),
            OpType::DropCollection => (
                OperationType::DropCollection,
                Value::Null,
                None,
                None,
                None,
            ),
            OpType::CreateIndex => (
                OperationType::CreateIndex,
                Value::Null,
                None,
                None,
                entry.index_def.clone(),
            ),
            OpType::DropIndex => (
                OperationType::DropIndex,
                Value::Null,
                None,
                None,
                entry.index_def.clone(),
            ),
            OpType::Noop => return None,
        };

    Some(ChangeEvent {
        operation_type,
        database: entry.database.clone(),
        collection: entry.collection.clone(),
        document_key,
        full_document,
        update_description,
        index_definition,
        resume_token: ResumeToken { op_id: entry.op_id },
    })
}

fn derive_update_description(update: Option<&Value>) -> UpdateDescription {
    let mut desc = UpdateDescription::default();
    let Some(Value::Object(spec)) = update else {
        return desc;
    };

    for (operator, fields) in spec {
        let Value::Object(fields) = fields else {
            continue;
        };
        match operator.as_str() {
            "$set" | "$inc" => {
                for (field, value) in fields {
                    desc.updated_fields.insert(field.clone(), value.clone());
                }
            }
            "$unset" => {
                desc.removed_fields.extend(fields.keys().cloned());
            }
            _ => {}
        }
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(op_type: OpType) -> OplogEntry {
        OplogEntry {
            op_id: 1,
            timestamp: 0,
            op_type,
            database: "db".into(),
            collection: "coll".into(),
            doc_id: Some("abc".into()),
            document: Some(serde_json::json!({"_id": "abc", "x": 1})),
            filter: None,
            update: None,
            index_def: None,
        }
    }

    #[test]
    fn insert_maps_full_document_and_key() {
        let event = map_entry(&entry(OpType::Insert)).unwrap();
        assert_eq!(event.operation_type, OperationType::Insert);
        assert_eq!(event.document_key, serde_json::json!({"_id": "abc"}));
        assert!(event.full_document.is_some());
    }

    #[test]
    fn update_splits_set_and_unset_into_description() {
        let mut e = entry(OpType::Update);
        e.update = Some(serde_json::json!({
            "$set": {"a": 1},
            "$inc": {"b": 2},
            "$unset": {"c": ""}
        }));
        let event = map_entry(&e).unwrap();
        let desc = event.update_description.unwrap();
        assert_eq!(desc.updated_fields.get("a").unwrap(), &serde_json::json!(1));
        assert_eq!(desc.updated_fields.get("b").unwrap(), &serde_json::json!(2));
        assert_eq!(desc.removed_fields, vec!["c".to_string()]);
    }

    #[test]
    fn noop_has_no_event() {
        assert!(map_entry(&entry(OpType::Noop)).is_none());
    }
}
