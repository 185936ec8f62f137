use rust_user_orm::filter::{Filter, QueryOperator};
use rust_user_orm::sqlite::{
    Assignment, ColumnConstraint, ColumnDefinition, CreateOperation, CrudOperation, CrudResult,
    DataType, DeleteOperation, IndexDefinition, Params, ReadOperation, Schema, SortOrder,
    SqlQuery, SqliteConfig, SqliteService, TableDefinition, UpdateOperation, Value, IN_MEMORY,
};
use rust_user_orm::{Service, StoreError};
use tempfile::NamedTempFile;

#[derive(Debug)]
struct User {
    name: String,
    email: String,
    age: Option<i64>,
}

// Same shape as the plain rusqlite table: id, unique email, optional age.
fn users_schema() -> Schema {
    Schema::new().add_table(
        TableDefinition::new("users")
            .column(ColumnDefinition::new("id", DataType::Integer))
            .column(
                ColumnDefinition::new("name", DataType::Text).constraint(ColumnConstraint::NotNull),
            )
            .column(
                ColumnDefinition::new("email", DataType::Text)
                    .constraint(ColumnConstraint::NotNull)
                    .constraint(ColumnConstraint::Unique),
            )
            .column(ColumnDefinition::new("age", DataType::Integer))
            .primary_key(&["id"])
            .index(IndexDefinition::new("idx_users_email", &["email"], false)),
    )
}

// Helper function to create an in-memory database for testing
async fn create_test_db() -> SqliteService {
    let service = SqliteService::new(SqliteConfig::new(IN_MEMORY, users_schema()));
    service.start().await.unwrap();
    service
}

// Helper function to create a temporary file-based database
async fn create_temp_db() -> (SqliteService, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let service = SqliteService::new(SqliteConfig::new(path, users_schema()));
    service.start().await.unwrap();
    (service, temp_file)
}

fn insert(name: &str, email: &str, age: Option<i64>) -> CrudOperation {
    CrudOperation::Create(CreateOperation::new("users").with_row(vec![
        ("name", name.into()),
        ("email", email.into()),
        ("age", age.into()),
    ]))
}

fn decode(result: CrudResult) -> Vec<User> {
    result
        .into_rows()
        .iter()
        .map(|row| User {
            name: row.text("name").unwrap(),
            email: row.text("email").unwrap(),
            age: row.opt_integer("age").unwrap(),
        })
        .collect()
}

fn by_email(email: &str) -> Filter {
    Filter::field("email", QueryOperator::eq(email))
}

#[tokio::test]
async fn test_basic_operations() {
    let service = create_test_db().await;

    // Insert a new user
    let created = decode(
        service
            .execute_crud(insert("John Doe", "john@example.com", Some(30)))
            .await
            .unwrap(),
    );
    assert_eq!(created.len(), 1);

    // Query a user
    let read = ReadOperation::new("users").with_filter(by_email("john@example.com"));
    let users = decode(service.execute_crud(CrudOperation::Read(read.clone())).await.unwrap());
    assert_eq!(users[0].name, "John Doe");
    assert_eq!(users[0].email, "john@example.com");
    assert_eq!(users[0].age, Some(30));

    // Update the user
    let update = UpdateOperation::new("users", by_email("john@example.com"))
        .assign("age", Assignment::Increment(Value::Integer(1)));
    let affected = service.execute_crud(CrudOperation::Update(update)).await.unwrap();
    assert_eq!(affected, CrudResult::Affected(1));
    let users = decode(service.execute_crud(CrudOperation::Read(read.clone())).await.unwrap());
    assert_eq!(users[0].age, Some(31));

    // Delete the user
    let delete = DeleteOperation::new("users", by_email("john@example.com"));
    service.execute_crud(CrudOperation::Delete(delete)).await.unwrap();
    let users = decode(service.execute_crud(CrudOperation::Read(read)).await.unwrap());
    assert!(users.is_empty());

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_unique_email_is_reported_by_field() {
    let service = create_test_db().await;
    service
        .execute_crud(insert("a", "same@example.com", None))
        .await
        .unwrap();
    let err = service
        .execute_crud(insert("b", "same@example.com", None))
        .await
        .unwrap_err();
    match err {
        StoreError::UniqueViolation { fields } => assert_eq!(fields, vec!["email"]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_batch_create_is_all_or_nothing() {
    let service = create_test_db().await;
    let batch = CreateOperation::new("users")
        .with_row(vec![("name", "a".into()), ("email", "a@example.com".into())])
        .with_row(vec![("name", "b".into()), ("email", "a@example.com".into())]);
    assert!(service.execute_crud(CrudOperation::Create(batch.clone())).await.is_err());

    let all = service
        .execute_crud(CrudOperation::Read(ReadOperation::new("users")))
        .await
        .unwrap();
    assert_eq!(all.count(), 0);

    let inserted = service
        .execute_crud(CrudOperation::Create(batch.skip_duplicates(true)))
        .await
        .unwrap();
    assert_eq!(inserted.count(), 1);
}

#[tokio::test]
async fn test_ordering_pagination_and_distinct() {
    let service = create_test_db().await;
    for (name, email, age) in [
        ("ann", "ann@example.com", 40),
        ("bob", "bob@example.com", 20),
        ("cid", "cid@example.com", 30),
        ("ann", "ann2@example.com", 10),
    ] {
        service.execute_crud(insert(name, email, Some(age))).await.unwrap();
    }

    let page = ReadOperation::new("users")
        .order_by("age", SortOrder::Desc)
        .with_offset(Some(1))
        .with_limit(Some(2));
    let users = decode(service.execute_crud(CrudOperation::Read(page)).await.unwrap());
    let ages: Vec<_> = users.iter().map(|user| user.age).collect();
    assert_eq!(ages, vec![Some(30), Some(20)]);

    let mut distinct = ReadOperation::new("users").with_limit(Some(2));
    distinct.distinct = vec!["name".to_string()];
    let users = decode(service.execute_crud(CrudOperation::Read(distinct)).await.unwrap());
    let names: Vec<_> = users.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["ann", "bob"]);
}

#[tokio::test]
async fn test_divide_by_zero_is_rejected() {
    let service = create_test_db().await;
    let update = UpdateOperation::new("users", Filter::All)
        .assign("age", Assignment::Divide(Value::Integer(0)));
    let err = service
        .execute_crud(CrudOperation::Update(update))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_raw_sql_with_named_params() {
    let service = create_test_db().await;
    service
        .execute_crud(insert("Jane", "jane@example.com", Some(25)))
        .await
        .unwrap();
    let query = SqlQuery::new("SELECT name, age FROM users WHERE age >= :min_age")
        .with_params(Params::new().with_value("min_age", 18));
    let rows = service.execute_sql(query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Jane".into())));
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let service = create_test_db().await;
    let result: Result<(), StoreError> = service
        .transaction(|tx| {
            rust_user_orm::sqlite::run_crud(tx, &insert("Temp", "temp@example.com", None))?;
            Err(StoreError::invalid("abort"))
        })
        .await;
    assert!(result.is_err());
    let rows = service
        .execute_crud(CrudOperation::Read(ReadOperation::new("users")))
        .await
        .unwrap();
    assert_eq!(rows.count(), 0);
}

#[tokio::test]
async fn test_file_database_persists_across_restarts() {
    let (service, temp_file) = create_temp_db().await;
    service
        .execute_crud(insert("Persisted", "persisted@example.com", None))
        .await
        .unwrap();
    service.stop().await.unwrap();
    assert!(!service.is_open().await);

    let reopened = SqliteService::new(SqliteConfig::new(
        temp_file.path().to_str().unwrap(),
        users_schema(),
    ));
    reopened.start().await.unwrap();
    let users = decode(
        reopened
            .execute_crud(CrudOperation::Read(ReadOperation::new("users")))
            .await
            .unwrap(),
    );
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Persisted");
}

#[tokio::test]
async fn test_stopped_service_refuses_work() {
    let service = create_test_db().await;
    service.stop().await.unwrap();
    service.stop().await.unwrap();
    let err = service
        .execute_crud(CrudOperation::Read(ReadOperation::new("users")))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotStarted));
}
