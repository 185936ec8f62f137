//! `select` / `include` shaping of returned records.
//!
//! A [`Projection`] is either a select or an include, never both.

use serde_json::{Map, Value as Json};

use crate::client::Client;
use crate::error::{Result, StoreError};
use crate::models::{Relation, User};

#[derive(Debug, Clone, PartialEq)]
pub enum SelectField {
    Scalar(String),
    /// A relation, optionally narrowed to the listed fields.
    Relation(Relation, Vec<SelectField>),
}

impl SelectField {
    pub fn scalar(name: &str) -> Self {
        SelectField::Scalar(name.to_string())
    }

    pub fn relation(relation: Relation, fields: Vec<SelectField>) -> Self {
        SelectField::Relation(relation, fields)
    }

    fn key(&self) -> &str {
        match self {
            SelectField::Scalar(name) => name.as_str(),
            SelectField::Relation(relation, _) => relation.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Only the listed fields.
    Select(Vec<SelectField>),
    /// Every scalar plus the listed relations.
    Include(Vec<Relation>),
}

impl Projection {
    /// Relations that must be loaded before shaping.
    pub fn relations(&self) -> Vec<Relation> {
        match self {
            Projection::Include(relations) => relations.clone(),
            Projection::Select(fields) => fields
                .iter()
                .filter_map(|field| match field {
                    SelectField::Relation(relation, _) => Some(*relation),
                    SelectField::Scalar(_) => None,
                })
                .collect(),
        }
    }

    /// Loads the relations the projection needs and renders `user` through it.
    pub async fn shape_user(&self, client: &Client, user: User) -> Result<Json> {
        let user = client.user().load_relations(user, &self.relations()).await?;
        self.shape(serde_json::to_value(&user)?)
    }

    /// Applies the projection to an already serialised record (or list of them).
    pub fn shape(&self, value: Json) -> Result<Json> {
        match self {
            Projection::Include(_) => Ok(value),
            Projection::Select(fields) => select_fields(&value, fields),
        }
    }
}

fn select_fields(value: &Json, fields: &[SelectField]) -> Result<Json> {
    match value {
        Json::Null => Ok(Json::Null),
        Json::Array(items) => items
            .iter()
            .map(|item| select_fields(item, fields))
            .collect::<Result<Vec<_>>>()
            .map(Json::Array),
        Json::Object(record) => {
            let mut selected = Map::new();
            for field in fields {
                let key = field.key();
                let found = record.get(key).ok_or_else(|| {
                    StoreError::invalid(format!("unknown field `{key}` in select"))
                })?;
                let shaped = match field {
                    SelectField::Relation(_, nested) if !nested.is_empty() => {
                        select_fields(found, nested)?
                    }
                    _ => found.clone(),
                };
                selected.insert(key.to_string(), shaped);
            }
            Ok(Json::Object(selected))
        }
        _ => Err(StoreError::invalid("cannot select fields from a scalar value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_keeps_only_requested_keys() {
        let projection = Projection::Select(vec![
            SelectField::scalar("name"),
            SelectField::relation(Relation::UserPreference, vec![SelectField::scalar("id")]),
        ]);
        let record = json!({
            "id": "u1",
            "name": "person3",
            "userPreference": { "id": "p1", "emailUpdates": true }
        });
        assert_eq!(
            projection.shape(record).unwrap(),
            json!({ "name": "person3", "userPreference": { "id": "p1" } })
        );
    }

    #[test]
    fn select_through_missing_relation_yields_null() {
        let projection = Projection::Select(vec![SelectField::relation(
            Relation::UserPreference,
            vec![SelectField::scalar("id")],
        )]);
        let shaped = projection
            .shape(json!({ "userPreference": null }))
            .unwrap();
        assert_eq!(shaped, json!({ "userPreference": null }));
    }

    #[test]
    fn select_rejects_unknown_fields() {
        let projection = Projection::Select(vec![SelectField::scalar("nickname")]);
        assert!(matches!(
            projection.shape(json!({ "name": "x" })),
            Err(StoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn include_lists_its_relations() {
        let projection = Projection::Include(vec![Relation::WrittenPosts]);
        assert_eq!(projection.relations(), vec![Relation::WrittenPosts]);
        let record = json!({ "id": "u1", "writtenPosts": [] });
        assert_eq!(projection.shape(record.clone()).unwrap(), record);
    }
}
