use rust_user_orm::client::{FindArgs, UserCreateInput};
use rust_user_orm::filter::Filter;
use rust_user_orm::sqlite::IN_MEMORY;
use rust_user_orm::walkthrough::{self, StepError, STEPS};
use rust_user_orm::{Client, StoreError};
use serde_json::Value as Json;
use tempfile::NamedTempFile;

async fn run_steps(
    client: &Client,
    names: &[&str],
) -> (Vec<(String, Json)>, Result<usize, StepError>) {
    let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    let steps = walkthrough::select_steps(&names).unwrap();
    let mut reported = Vec::new();
    let outcome = walkthrough::run(client, &steps, |name, output| {
        reported.push((name.to_string(), output.clone()));
    })
    .await;
    (reported, outcome)
}

#[tokio::test]
async fn fresh_database_stops_at_duplicate_create_many() {
    let client = Client::connect_path(IN_MEMORY).await.unwrap();
    let (reported, outcome) = run_steps(&client, &[]).await;

    // createUser3 carries only a select, so the run gets past it.
    let names: Vec<_> = reported.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["createUser", "createUser2", "createUser3"]);
    assert_eq!(reported[0].1["name"], "person1");
    assert_eq!(reported[2].1["name"], "person3");
    assert!(reported[2].1["userPreference"]["id"].is_string());
    assert!(reported[2].1.get("email").is_none());

    let err = outcome.unwrap_err();
    assert_eq!(err.step, "createManyUsers");
    assert_eq!(
        err.source.to_string(),
        "Unique constraint failed on the fields: (`email`)"
    );
    // The failed batch wrote nothing.
    assert_eq!(client.user().count(Filter::All).await.unwrap(), 3);

    client.disconnect().await.unwrap();
    assert!(!client.service().is_open().await);
}

#[tokio::test]
async fn query_steps_run_against_seeded_data() {
    let client = Client::connect_path(IN_MEMORY).await.unwrap();
    let (_, outcome) = run_steps(&client, &["createManyUsers"]).await;
    assert_eq!(outcome.unwrap(), 1);

    let (reported, outcome) = run_steps(
        &client,
        &[
            "findUniqueUser",
            "findManyPaginatedUsers",
            "findManyUsersWhereNot",
            "updateUserIncrement",
            "updateManyUsers",
        ],
    )
    .await;
    assert_eq!(outcome.unwrap(), 5);

    let output = |name: &str| {
        reported
            .iter()
            .find(|(step, _)| step == name)
            .map(|(_, json)| json.clone())
            .unwrap()
    };
    assert_eq!(output("findUniqueUser")["email"], "person2@test.com");
    let page: Vec<_> = output("findManyPaginatedUsers")
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["age"].as_i64().unwrap())
        .collect();
    assert_eq!(page, vec![30, 40]);
    assert_eq!(output("findManyUsersWhereNot").as_array().unwrap().len(), 2);
    assert_eq!(output("updateUserIncrement")["age"], 21);
    assert_eq!(output("updateManyUsers")["count"], 0);
}

#[tokio::test]
async fn relation_steps_report_missing_connect_target() {
    let client = Client::connect_path(IN_MEMORY).await.unwrap();
    client
        .user()
        .create(UserCreateInput::new("person1").age(20).email("person1@test.com"))
        .await
        .unwrap();

    let (reported, outcome) = run_steps(
        &client,
        &[
            "updateUserAndCreateRelationship",
            "oneToOneRelationship",
            "updateUserAndConnectRelationship",
        ],
    )
    .await;
    // Walkthrough order puts the relation query before the relation writes.
    let names: Vec<_> = reported.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec!["oneToOneRelationship", "updateUserAndCreateRelationship"]
    );
    assert!(reported[0].1.as_array().unwrap().is_empty());
    assert!(reported[1].1["userPreferenceId"].is_string());

    let err = outcome.unwrap_err();
    assert_eq!(err.step, "updateUserAndConnectRelationship");
    assert!(matches!(err.source, StoreError::RecordNotFound { .. }));
}

#[tokio::test]
async fn delete_steps_empty_a_file_database() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let client = Client::connect_path(&path).await.unwrap();
    run_steps(&client, &["createManyUsers"]).await.1.unwrap();

    let (reported, outcome) = run_steps(&client, &["deleteUser", "deleteAllUsers"]).await;
    outcome.unwrap();
    assert_eq!(reported[0].1["name"], "person3");
    assert_eq!(reported[1].1["count"], 2);
    client.disconnect().await.unwrap();

    let reopened = Client::connect_path(&path).await.unwrap();
    assert!(reopened
        .user()
        .find_many(FindArgs::new())
        .await
        .unwrap()
        .is_empty());
    reopened.disconnect().await.unwrap();
}

#[test]
fn every_step_is_listed_once() {
    assert_eq!(STEPS.len(), 31);
    assert_eq!(STEPS[0].name, "createUser");
    assert_eq!(STEPS[STEPS.len() - 1].name, "deleteManyUsers");
}
