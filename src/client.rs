//! Typed client over [`SqliteService`].
//!
//! Each delegate method is one awaited round trip. Writes that touch more
//! than one table (nested relation creates, connects, lookups followed by a
//! write) run inside a single transaction.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::filter::{Filter, Quantifier, QueryOperator};
use crate::models::columns::*;
use crate::models::{
    app_schema, decode_all, new_id, Post, Relation, User, UserPreference, POST_TABLE,
    USER_PREFERENCE_TABLE, USER_TABLE,
};
use crate::service::Service;
use crate::sqlite::{
    run_crud, Assignment, CreateOperation, CrudOperation, DeleteOperation, ReadOperation, Row,
    SortOrder, SqliteConfig, SqliteService, UpdateOperation, Value,
};

const UPDATE_NOT_FOUND: &str = "Record to update not found.";
const DELETE_NOT_FOUND: &str = "Record to delete does not exist.";
const PREFERENCE_CONNECT_NOT_FOUND: &str = "No 'UserPreference' record was found for a nested connect on one-to-one relation 'UserToUserPreference'.";
const AUTHOR_CONNECT_NOT_FOUND: &str =
    "No 'User' record was found for a nested connect on one-to-many relation 'WrittenPosts'.";

/// Handle to the database. Acquire with [`Client::connect`], release with
/// [`Client::disconnect`].
pub struct Client {
    service: SqliteService,
}

impl Client {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            service: SqliteService::new(config),
        }
    }

    /// Opens the database at `config.db_path` and applies its schema.
    pub async fn connect(config: SqliteConfig) -> Result<Self> {
        let client = Self::new(config);
        client.service.start().await?;
        Ok(client)
    }

    /// Opens `path` with the application schema.
    pub async fn connect_path(path: &str) -> Result<Self> {
        Self::connect(SqliteConfig::new(path, app_schema())).await
    }

    pub fn service(&self) -> &SqliteService {
        &self.service
    }

    pub fn user(&self) -> UserDelegate<'_> {
        UserDelegate {
            service: &self.service,
        }
    }

    pub fn post(&self) -> PostDelegate<'_> {
        PostDelegate {
            service: &self.service,
        }
    }

    pub fn user_preference(&self) -> UserPreferenceDelegate<'_> {
        UserPreferenceDelegate {
            service: &self.service,
        }
    }

    /// Deletes every row, children first.
    pub async fn reset(&self) -> Result<()> {
        self.service
            .transaction(|tx| {
                for table in [POST_TABLE, USER_TABLE, USER_PREFERENCE_TABLE] {
                    let deleted =
                        run_crud(tx, &CrudOperation::Delete(DeleteOperation::new(table, Filter::All)))?;
                    debug!(table, rows = deleted.count(), "cleared table");
                }
                Ok(())
            })
            .await
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn disconnect(&self) -> Result<()> {
        self.service.stop().await
    }
}

/// Unique selectors for a single user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserWhereUnique {
    Id(String),
    Email(String),
    AgeName { age: i64, name: String },
}

impl UserWhereUnique {
    pub fn email(email: impl Into<String>) -> Self {
        UserWhereUnique::Email(email.into())
    }

    pub fn age_name(age: i64, name: impl Into<String>) -> Self {
        UserWhereUnique::AgeName {
            age,
            name: name.into(),
        }
    }

    pub fn filter(&self) -> Filter {
        match self {
            UserWhereUnique::Id(id) => UserFilter::id(id),
            UserWhereUnique::Email(email) => UserFilter::email(QueryOperator::eq(email.as_str())),
            UserWhereUnique::AgeName { age, name } => Filter::And(vec![
                UserFilter::age(QueryOperator::eq(*age)),
                UserFilter::name(QueryOperator::eq(name.as_str())),
            ]),
        }
    }
}

/// Relation write nested in a user create.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceCreate {
    Create { email_updates: bool },
    Connect { id: String },
}

/// Relation write nested in a user update.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceUpdate {
    Create { email_updates: bool },
    Connect { id: String },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntUpdate {
    Set(i64),
    Increment(i64),
    Decrement(i64),
    Multiply(i64),
    Divide(i64),
}

impl IntUpdate {
    fn assignment(self) -> Assignment {
        match self {
            IntUpdate::Set(value) => Assignment::Set(value.into()),
            IntUpdate::Increment(value) => Assignment::Increment(value.into()),
            IntUpdate::Decrement(value) => Assignment::Decrement(value.into()),
            IntUpdate::Multiply(value) => Assignment::Multiply(value.into()),
            IntUpdate::Divide(value) => Assignment::Divide(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserCreateInput {
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i64>,
    pub user_preference: Option<PreferenceCreate>,
}

impl UserCreateInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn age(mut self, age: i64) -> Self {
        self.age = Some(age);
        self
    }

    pub fn user_preference(mut self, preference: PreferenceCreate) -> Self {
        self.user_preference = Some(preference);
        self
    }

    fn row(&self, preference_id: Option<String>) -> Vec<(&'static str, Value)> {
        vec![
            (ID, new_id().into()),
            (NAME, self.name.clone().into()),
            (EMAIL, self.email.clone().into()),
            (AGE, self.age.into()),
            (USER_PREFERENCE_ID, preference_id.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserUpdateInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<IntUpdate>,
    pub user_preference: Option<PreferenceUpdate>,
}

impl UserUpdateInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn age(mut self, update: IntUpdate) -> Self {
        self.age = Some(update);
        self
    }

    pub fn user_preference(mut self, update: PreferenceUpdate) -> Self {
        self.user_preference = Some(update);
        self
    }

    fn scalar_update(&self, filter: Filter) -> UpdateOperation {
        let mut op = UpdateOperation::new(USER_TABLE, filter);
        if let Some(name) = &self.name {
            op = op.assign(NAME, Assignment::Set(name.as_str().into()));
        }
        if let Some(email) = &self.email {
            op = op.assign(EMAIL, Assignment::Set(email.as_str().into()));
        }
        if let Some(age) = self.age {
            op = op.assign(AGE, age.assignment());
        }
        op
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostCreateInput {
    pub title: String,
    pub author: UserWhereUnique,
}

impl PostCreateInput {
    pub fn new(title: impl Into<String>, author: UserWhereUnique) -> Self {
        Self {
            title: title.into(),
            author,
        }
    }
}

/// Arguments shared by `find_first` and `find_many`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindArgs {
    pub filter: Filter,
    pub order_by: Vec<(String, SortOrder)>,
    pub skip: Option<u32>,
    pub take: Option<u32>,
    pub distinct: Vec<String>,
    pub include: Vec<Relation>,
}

impl FindArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.order_by.push((column.to_string(), order));
        self
    }

    pub fn skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u32) -> Self {
        self.take = Some(take);
        self
    }

    pub fn distinct(mut self, column: &str) -> Self {
        self.distinct.push(column.to_string());
        self
    }

    pub fn include(mut self, relation: Relation) -> Self {
        self.include.push(relation);
        self
    }

    fn read(&self, table: &str) -> ReadOperation {
        ReadOperation {
            table: table.to_string(),
            filter: self.filter.clone(),
            fields: None,
            limit: self.take,
            offset: self.skip,
            order_by: self.order_by.clone(),
            distinct: self.distinct.clone(),
        }
    }
}

/// Filter builders for the `User` table.
pub struct UserFilter;

impl UserFilter {
    pub fn id(id: &str) -> Filter {
        Filter::field(ID, QueryOperator::eq(id))
    }

    pub fn name(op: QueryOperator) -> Filter {
        Filter::field(NAME, op)
    }

    pub fn email(op: QueryOperator) -> Filter {
        Filter::field(EMAIL, op)
    }

    pub fn age(op: QueryOperator) -> Filter {
        Filter::field(AGE, op)
    }

    /// Users whose preference exists and matches `filter`.
    pub fn user_preference(filter: Filter) -> Filter {
        Filter::related(
            USER_PREFERENCE_TABLE,
            ID,
            USER_PREFERENCE_ID,
            Quantifier::Is,
            filter,
        )
    }

    pub fn written_posts(quantifier: Quantifier, filter: Filter) -> Filter {
        Filter::related(POST_TABLE, AUTHOR_ID, ID, quantifier, filter)
    }
}

/// Filter builders for the `UserPreference` table.
pub struct PreferenceFilter;

impl PreferenceFilter {
    pub fn email_updates(enabled: bool) -> Filter {
        Filter::field(EMAIL_UPDATES, QueryOperator::eq(enabled))
    }
}

/// Filter builders for the `Post` table.
pub struct PostFilter;

impl PostFilter {
    pub fn title(op: QueryOperator) -> Filter {
        Filter::field(TITLE, op)
    }

    pub fn author_is(filter: Filter) -> Filter {
        Filter::related(USER_TABLE, ID, AUTHOR_ID, Quantifier::Is, filter)
    }

    pub fn author_is_not(filter: Filter) -> Filter {
        Filter::related(USER_TABLE, ID, AUTHOR_ID, Quantifier::IsNot, filter)
    }
}

pub struct UserDelegate<'a> {
    service: &'a SqliteService,
}

impl UserDelegate<'_> {
    pub async fn create(&self, data: UserCreateInput) -> Result<User> {
        self.service
            .transaction(move |tx| create_user(tx, &data))
            .await
    }

    /// Inserts all rows or none; returns how many were inserted.
    pub async fn create_many(&self, data: Vec<UserCreateInput>) -> Result<usize> {
        self.create_many_inner(data, false).await
    }

    /// Like [`create_many`](Self::create_many) but rows colliding with a
    /// unique constraint are skipped instead of failing the batch.
    pub async fn create_many_skip_duplicates(&self, data: Vec<UserCreateInput>) -> Result<usize> {
        self.create_many_inner(data, true).await
    }

    async fn create_many_inner(&self, data: Vec<UserCreateInput>, skip: bool) -> Result<usize> {
        if data.iter().any(|input| input.user_preference.is_some()) {
            return Err(StoreError::invalid(
                "nested relation writes are not supported in createMany",
            ));
        }
        let op = data.iter().fold(
            CreateOperation::new(USER_TABLE).skip_duplicates(skip),
            |op, input| op.with_row(input.row(None)),
        );
        self.service
            .with_connection(move |conn| Ok(run_crud(conn, &CrudOperation::Create(op))?.count()))
            .await
    }

    pub async fn find_unique(&self, where_unique: UserWhereUnique) -> Result<Option<User>> {
        self.service
            .with_connection(move |conn| find_user(conn, where_unique.filter()))
            .await
    }

    pub async fn find_first(&self, args: FindArgs) -> Result<Option<User>> {
        Ok(self.find_many(args.take(1)).await?.into_iter().next())
    }

    pub async fn find_many(&self, args: FindArgs) -> Result<Vec<User>> {
        self.service
            .with_connection(move |conn| {
                let mut users = read_users(conn, &args.read(USER_TABLE))?;
                for user in &mut users {
                    load_user_relations(conn, user, &args.include)?;
                }
                Ok(users)
            })
            .await
    }

    pub async fn count(&self, filter: Filter) -> Result<usize> {
        let op = ReadOperation::new(USER_TABLE)
            .with_filter(filter)
            .with_fields(&[ID]);
        self.service
            .with_connection(move |conn| Ok(run_crud(conn, &CrudOperation::Read(op))?.count()))
            .await
    }

    /// Populates `relations` on an already fetched user.
    pub async fn load_relations(&self, mut user: User, relations: &[Relation]) -> Result<User> {
        let relations = relations.to_vec();
        self.service
            .with_connection(move |conn| {
                load_user_relations(conn, &mut user, &relations)?;
                Ok(user)
            })
            .await
    }

    pub async fn update(&self, where_unique: UserWhereUnique, data: UserUpdateInput) -> Result<User> {
        self.service
            .transaction(move |tx| {
                let user = find_user(tx, where_unique.filter())?
                    .ok_or_else(|| StoreError::not_found(UPDATE_NOT_FOUND))?;
                let by_id = UserFilter::id(&user.id);
                let mut op = data.scalar_update(by_id.clone());
                match &data.user_preference {
                    None => {}
                    Some(PreferenceUpdate::Create { email_updates }) => {
                        let preference = insert_preference(tx, *email_updates)?;
                        op = op.assign(USER_PREFERENCE_ID, Assignment::Set(preference.id.into()));
                    }
                    Some(PreferenceUpdate::Connect { id }) => {
                        let preference = connect_preference(tx, id, &user.id)?;
                        op = op.assign(USER_PREFERENCE_ID, Assignment::Set(preference.id.into()));
                    }
                    Some(PreferenceUpdate::Disconnect) => {
                        op = op.assign(USER_PREFERENCE_ID, Assignment::Set(Value::Null));
                    }
                }
                run_crud(tx, &CrudOperation::Update(op))?;
                find_user(tx, by_id)?.ok_or_else(|| StoreError::not_found(UPDATE_NOT_FOUND))
            })
            .await
    }

    /// Applies scalar updates to every matching user; returns the count.
    pub async fn update_many(&self, filter: Filter, data: UserUpdateInput) -> Result<usize> {
        if data.user_preference.is_some() {
            return Err(StoreError::invalid(
                "relation writes are not supported in updateMany",
            ));
        }
        let op = data.scalar_update(filter);
        self.service
            .with_connection(move |conn| Ok(run_crud(conn, &CrudOperation::Update(op))?.count()))
            .await
    }

    pub async fn delete(&self, where_unique: UserWhereUnique) -> Result<User> {
        self.service
            .transaction(move |tx| {
                let user = find_user(tx, where_unique.filter())?
                    .ok_or_else(|| StoreError::not_found(DELETE_NOT_FOUND))?;
                let op = DeleteOperation::new(USER_TABLE, UserFilter::id(&user.id));
                run_crud(tx, &CrudOperation::Delete(op))?;
                Ok(user)
            })
            .await
    }

    pub async fn delete_many(&self, filter: Filter) -> Result<usize> {
        let op = DeleteOperation::new(USER_TABLE, filter);
        self.service
            .with_connection(move |conn| Ok(run_crud(conn, &CrudOperation::Delete(op))?.count()))
            .await
    }
}

pub struct PostDelegate<'a> {
    service: &'a SqliteService,
}

impl PostDelegate<'_> {
    pub async fn create(&self, data: PostCreateInput) -> Result<Post> {
        self.service
            .transaction(move |tx| {
                let author = find_user(tx, data.author.filter())?
                    .ok_or_else(|| StoreError::not_found(AUTHOR_CONNECT_NOT_FOUND))?;
                let op = CreateOperation::new(POST_TABLE).with_row(vec![
                    (ID, new_id().into()),
                    (TITLE, data.title.as_str().into()),
                    (AUTHOR_ID, author.id.into()),
                ]);
                let rows = run_crud(tx, &CrudOperation::Create(op))?.into_rows();
                inserted(&rows)
            })
            .await
    }

    pub async fn find_many(&self, args: FindArgs) -> Result<Vec<Post>> {
        self.service
            .with_connection(move |conn| {
                let rows = run_crud(conn, &CrudOperation::Read(args.read(POST_TABLE)))?.into_rows();
                let mut posts: Vec<Post> = decode_all(&rows)?;
                for post in &mut posts {
                    load_post_relations(conn, post, &args.include)?;
                }
                Ok(posts)
            })
            .await
    }

    pub async fn delete_many(&self, filter: Filter) -> Result<usize> {
        let op = DeleteOperation::new(POST_TABLE, filter);
        self.service
            .with_connection(move |conn| Ok(run_crud(conn, &CrudOperation::Delete(op))?.count()))
            .await
    }
}

pub struct UserPreferenceDelegate<'a> {
    service: &'a SqliteService,
}

impl UserPreferenceDelegate<'_> {
    pub async fn create(&self, email_updates: bool) -> Result<UserPreference> {
        self.service
            .with_connection(move |conn| insert_preference(conn, email_updates))
            .await
    }

    pub async fn find_unique(&self, id: &str) -> Result<Option<UserPreference>> {
        let id = id.to_string();
        self.service
            .with_connection(move |conn| find_preference(conn, &id))
            .await
    }

    pub async fn find_many(&self, args: FindArgs) -> Result<Vec<UserPreference>> {
        if !args.include.is_empty() {
            return Err(StoreError::invalid("UserPreference has no includable relations"));
        }
        self.service
            .with_connection(move |conn| {
                let rows = run_crud(conn, &CrudOperation::Read(args.read(USER_PREFERENCE_TABLE)))?
                    .into_rows();
                decode_all(&rows)
            })
            .await
    }
}

fn create_user(conn: &Connection, data: &UserCreateInput) -> Result<User> {
    let preference_id = match &data.user_preference {
        None => None,
        Some(PreferenceCreate::Create { email_updates }) => {
            Some(insert_preference(conn, *email_updates)?.id)
        }
        Some(PreferenceCreate::Connect { id }) => Some(find_preference(conn, id)?
            .ok_or_else(|| StoreError::not_found(PREFERENCE_CONNECT_NOT_FOUND))?
            .id),
    };
    let op = CreateOperation::new(USER_TABLE).with_row(data.row(preference_id));
    let rows = run_crud(conn, &CrudOperation::Create(op))?.into_rows();
    inserted(&rows)
}

fn inserted<'a, T>(rows: &'a [Row]) -> Result<T>
where
    T: TryFrom<&'a Row, Error = StoreError>,
{
    let row = rows
        .first()
        .ok_or_else(|| StoreError::invalid("insert produced no row"))?;
    T::try_from(row)
}

fn read_users(conn: &Connection, op: &ReadOperation) -> Result<Vec<User>> {
    let rows = run_crud(conn, &CrudOperation::Read(op.clone()))?.into_rows();
    decode_all(&rows)
}

fn find_user(conn: &Connection, filter: Filter) -> Result<Option<User>> {
    let op = ReadOperation::new(USER_TABLE)
        .with_filter(filter)
        .with_limit(Some(1));
    Ok(read_users(conn, &op)?.into_iter().next())
}

fn find_preference(conn: &Connection, id: &str) -> Result<Option<UserPreference>> {
    let op = ReadOperation::new(USER_PREFERENCE_TABLE)
        .with_filter(Filter::field(ID, QueryOperator::eq(id)))
        .with_limit(Some(1));
    let rows = run_crud(conn, &CrudOperation::Read(op))?.into_rows();
    rows.first().map(UserPreference::try_from).transpose()
}

fn insert_preference(conn: &Connection, email_updates: bool) -> Result<UserPreference> {
    let op = CreateOperation::new(USER_PREFERENCE_TABLE).with_row(vec![
        (ID, new_id().into()),
        (EMAIL_UPDATES, email_updates.into()),
    ]);
    let rows = run_crud(conn, &CrudOperation::Create(op))?.into_rows();
    inserted(&rows)
}

/// Looks up the preference to connect and detaches it from any other user,
/// since the relation is one-to-one.
fn connect_preference(conn: &Connection, id: &str, user_id: &str) -> Result<UserPreference> {
    let preference = find_preference(conn, id)?
        .ok_or_else(|| StoreError::not_found(PREFERENCE_CONNECT_NOT_FOUND))?;
    let detach = UpdateOperation::new(
        USER_TABLE,
        Filter::And(vec![
            Filter::field(USER_PREFERENCE_ID, QueryOperator::eq(id)),
            Filter::field(ID, QueryOperator::NotEqual(user_id.into())),
        ]),
    )
    .assign(USER_PREFERENCE_ID, Assignment::Set(Value::Null));
    run_crud(conn, &CrudOperation::Update(detach))?;
    Ok(preference)
}

fn load_user_relations(conn: &Connection, user: &mut User, relations: &[Relation]) -> Result<()> {
    for relation in relations {
        match relation {
            Relation::UserPreference => {
                let preference = match &user.user_preference_id {
                    Some(id) => find_preference(conn, id)?,
                    None => None,
                };
                user.user_preference = Some(preference);
            }
            Relation::WrittenPosts => {
                let op = ReadOperation::new(POST_TABLE)
                    .with_filter(Filter::field(AUTHOR_ID, QueryOperator::eq(user.id.as_str())));
                let rows = run_crud(conn, &CrudOperation::Read(op))?.into_rows();
                user.written_posts = Some(decode_all(&rows)?);
            }
            Relation::Author => {
                return Err(StoreError::invalid("User has no relation `author`"));
            }
        }
    }
    Ok(())
}

fn load_post_relations(conn: &Connection, post: &mut Post, relations: &[Relation]) -> Result<()> {
    for relation in relations {
        match relation {
            Relation::Author => {
                let author = find_user(conn, UserFilter::id(&post.author_id))?.ok_or_else(|| {
                    StoreError::invalid(format!("post `{}` has no author", post.id))
                })?;
                post.author = Some(Box::new(author));
            }
            other => {
                return Err(StoreError::invalid(format!(
                    "Post has no relation `{}`",
                    other.key()
                )));
            }
        }
    }
    Ok(())
}
