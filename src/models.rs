//! Records of the `User` / `UserPreference` / `Post` schema and the DDL that
//! backs them.

use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::sqlite::{
    ColumnConstraint, ColumnDefinition, DataType, DefaultValue, ForeignKey, ForeignKeyAction,
    IndexDefinition, Row, Schema, TableDefinition,
};

pub const USER_TABLE: &str = "User";
pub const USER_PREFERENCE_TABLE: &str = "UserPreference";
pub const POST_TABLE: &str = "Post";

pub mod columns {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const AGE: &str = "age";
    pub const USER_PREFERENCE_ID: &str = "userPreferenceId";
    pub const EMAIL_UPDATES: &str = "emailUpdates";
    pub const TITLE: &str = "title";
    pub const AUTHOR_ID: &str = "authorId";
    pub const CREATED_AT: &str = "createdAt";
}

use columns::*;

/// Relations that can be loaded alongside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// `User.userPreference`, optional one-to-one.
    UserPreference,
    /// `User.writtenPosts`, one-to-many.
    WrittenPosts,
    /// `Post.author`, required many-to-one.
    Author,
}

impl Relation {
    /// Key the relation serialises under.
    pub fn key(self) -> &'static str {
        match self {
            Relation::UserPreference => "userPreference",
            Relation::WrittenPosts => "writtenPosts",
            Relation::Author => "author",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i64>,
    pub user_preference_id: Option<String>,
    /// `Some(None)` once loaded for a user without a preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_preference: Option<Option<UserPreference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_posts: Option<Vec<Post>>,
}

impl TryFrom<&Row> for User {
    type Error = StoreError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(User {
            id: row.text(ID)?,
            name: row.text(NAME)?,
            email: row.opt_text(EMAIL)?,
            age: row.opt_integer(AGE)?,
            user_preference_id: row.opt_text(USER_PREFERENCE_ID)?,
            user_preference: None,
            written_posts: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    pub id: String,
    pub email_updates: bool,
}

impl TryFrom<&Row> for UserPreference {
    type Error = StoreError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(UserPreference {
            id: row.text(ID)?,
            email_updates: row.boolean(EMAIL_UPDATES)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub author_id: String,
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Box<User>>,
}

impl TryFrom<&Row> for Post {
    type Error = StoreError;

    fn try_from(row: &Row) -> Result<Self> {
        Ok(Post {
            id: row.text(ID)?,
            title: row.text(TITLE)?,
            author_id: row.text(AUTHOR_ID)?,
            created_at: row.opt_text(CREATED_AT)?,
            author: None,
        })
    }
}

/// Decodes every row, failing on the first malformed one.
pub fn decode_all<'a, T>(rows: impl IntoIterator<Item = &'a Row>) -> Result<Vec<T>>
where
    T: TryFrom<&'a Row, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Fresh primary key for a new record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Tables backing the client. Email and `(age, name)` are unique; a
/// preference belongs to at most one user; posts keep their author alive.
/// `age` only ever holds an integer, so overflowing arithmetic is refused.
pub fn app_schema() -> Schema {
    let preference = TableDefinition::new(USER_PREFERENCE_TABLE)
        .column(ColumnDefinition::new(ID, DataType::Text).constraint(ColumnConstraint::NotNull))
        .column(
            ColumnDefinition::new(EMAIL_UPDATES, DataType::Boolean)
                .constraint(ColumnConstraint::NotNull)
                .default_value(DefaultValue::Boolean(false)),
        )
        .primary_key(&[ID]);

    let user = TableDefinition::new(USER_TABLE)
        .column(ColumnDefinition::new(ID, DataType::Text).constraint(ColumnConstraint::NotNull))
        .column(ColumnDefinition::new(NAME, DataType::Text).constraint(ColumnConstraint::NotNull))
        .column(ColumnDefinition::new(EMAIL, DataType::Text))
        .column(
            ColumnDefinition::new(AGE, DataType::Integer).constraint(ColumnConstraint::IntegerOnly),
        )
        .column(ColumnDefinition::new(USER_PREFERENCE_ID, DataType::Text))
        .primary_key(&[ID])
        .foreign_key(ForeignKey {
            column: USER_PREFERENCE_ID.to_string(),
            foreign_table: USER_PREFERENCE_TABLE.to_string(),
            foreign_column: ID.to_string(),
            on_delete: ForeignKeyAction::SetNull,
            on_update: ForeignKeyAction::Cascade,
        })
        .index(IndexDefinition::new("User_email_key", &[EMAIL], true))
        .index(IndexDefinition::new("User_userPreferenceId_key", &[USER_PREFERENCE_ID], true))
        .index(IndexDefinition::new("User_age_name_key", &[AGE, NAME], true));

    let post = TableDefinition::new(POST_TABLE)
        .column(ColumnDefinition::new(ID, DataType::Text).constraint(ColumnConstraint::NotNull))
        .column(ColumnDefinition::new(TITLE, DataType::Text).constraint(ColumnConstraint::NotNull))
        .column(
            ColumnDefinition::new(AUTHOR_ID, DataType::Text).constraint(ColumnConstraint::NotNull),
        )
        .column(
            ColumnDefinition::new(CREATED_AT, DataType::Text)
                .default_value(DefaultValue::CurrentTimestamp),
        )
        .primary_key(&[ID])
        .foreign_key(ForeignKey {
            column: AUTHOR_ID.to_string(),
            foreign_table: USER_TABLE.to_string(),
            foreign_column: ID.to_string(),
            on_delete: ForeignKeyAction::Restrict,
            on_update: ForeignKeyAction::Cascade,
        })
        .index(IndexDefinition::new("Post_authorId_idx", &[AUTHOR_ID], false));

    Schema::new().add_table(preference).add_table(user).add_table(post)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::Value;

    #[test]
    fn schema_orders_referenced_tables_first() {
        let names: Vec<_> = app_schema()
            .tables
            .iter()
            .map(|table| table.name.clone())
            .collect();
        assert_eq!(names, vec![USER_PREFERENCE_TABLE, USER_TABLE, POST_TABLE]);
    }

    #[test]
    fn user_serializes_loaded_relations_only() {
        let row = Row::new(
            vec![
                ID.into(),
                NAME.into(),
                EMAIL.into(),
                AGE.into(),
                USER_PREFERENCE_ID.into(),
            ],
            vec![
                Value::Text("u1".into()),
                Value::Text("person1".into()),
                Value::Null,
                Value::Integer(20),
                Value::Null,
            ],
        );
        let mut user = User::try_from(&row).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("userPreference").is_none());
        assert_eq!(json["userPreferenceId"], serde_json::Value::Null);

        user.user_preference = Some(None);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["userPreference"], serde_json::Value::Null);
    }
}
