//! The ordered tour of client operations.
//!
//! Each step is one awaited call whose result is reported as JSON. Steps run
//! strictly in order and the first failure ends the run.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value as Json};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::{
    Client, FindArgs, IntUpdate, PostFilter, PreferenceCreate, PreferenceFilter,
    PreferenceUpdate, UserCreateInput, UserFilter, UserUpdateInput, UserWhereUnique,
};
use crate::error::{Result, StoreError};
use crate::filter::{Filter, Quantifier, QueryOperator};
use crate::models::columns::{AGE, EMAIL};
use crate::models::Relation;
use crate::projection::{Projection, SelectField};
use crate::sqlite::SortOrder;

pub type StepFuture<'a> = BoxFuture<'a, Result<Json>>;

pub struct Step {
    pub name: &'static str,
    run: for<'a> fn(&'a Client) -> StepFuture<'a>,
}

impl Step {
    pub async fn run(&self, client: &Client) -> Result<Json> {
        (self.run)(client).await
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// A step that failed, ending the run.
#[derive(Error, Debug)]
#[error("step `{step}` failed")]
pub struct StepError {
    pub step: &'static str,
    #[source]
    pub source: StoreError,
}

pub const STEPS: &[Step] = &[
    Step { name: "createUser", run: create_user },
    Step { name: "createUser2", run: create_user2 },
    Step { name: "createUser3", run: create_user3 },
    Step { name: "createManyUsers", run: create_many_users },
    Step { name: "findUniqueUser", run: find_unique_user },
    Step { name: "findFirstUser", run: find_first_user },
    Step { name: "findAllUsers", run: find_all_users },
    Step { name: "findManyUsers", run: find_many_users },
    Step { name: "findManyDistinctUsers", run: find_many_distinct_users },
    Step { name: "findManyPaginatedUsers", run: find_many_paginated_users },
    Step { name: "findManyUsersWhereIn", run: find_where_in },
    Step { name: "findManyUsersWhereNotIn", run: find_where_not_in },
    Step { name: "findManyUsersWhereLessThan", run: find_where_less_than },
    Step { name: "findManyUsersWhereGreaterThan", run: find_where_greater_than },
    Step { name: "findManyUsersWhereContains", run: find_where_contains },
    Step { name: "findManyUsersWhereStartsWith", run: find_where_starts_with },
    Step { name: "findManyUsersWhereEndsWith", run: find_where_ends_with },
    Step { name: "findManyUsersWhereAnd", run: find_where_and },
    Step { name: "findManyUsersWhereNot", run: find_where_not },
    Step { name: "oneToOneRelationship", run: one_to_one_relationship },
    Step { name: "oneToManyRelationship", run: one_to_many_relationship },
    Step { name: "relationshipFiltering", run: relationship_filtering },
    Step { name: "updateUser", run: update_user },
    Step { name: "updateManyUsers", run: update_many_users },
    Step { name: "updateUserIncrement", run: update_user_increment },
    Step { name: "updateUserAndCreateRelationship", run: update_user_and_create_relationship },
    Step { name: "updateUserAndConnectRelationship", run: update_user_and_connect_relationship },
    Step { name: "updateUserAndDisconnectRelationship", run: update_user_and_disconnect_relationship },
    Step { name: "deleteUser", run: delete_user },
    Step { name: "deleteAllUsers", run: delete_all_users },
    Step { name: "deleteManyUsers", run: delete_many_users },
];

/// Resolves step names, keeping walkthrough order. No names selects every step.
pub fn select_steps(names: &[String]) -> Result<Vec<&'static Step>> {
    if let Some(unknown) = names
        .iter()
        .find(|name| !STEPS.iter().any(|step| step.name == name.as_str()))
    {
        return Err(StoreError::invalid(format!("unknown step `{unknown}`")));
    }
    Ok(STEPS
        .iter()
        .filter(|step| names.is_empty() || names.iter().any(|name| name == step.name))
        .collect())
}

/// Runs `steps` in order, handing each result to `report`. Returns how many
/// steps completed.
pub async fn run<F>(
    client: &Client,
    steps: &[&'static Step],
    mut report: F,
) -> std::result::Result<usize, StepError>
where
    F: FnMut(&str, &Json),
{
    for step in steps {
        debug!(step = step.name, "running step");
        let output = step.run(client).await.map_err(|source| StepError {
            step: step.name,
            source,
        })?;
        report(step.name, &output);
    }
    info!(steps = steps.len(), "walkthrough finished");
    Ok(steps.len())
}

fn to_json<T: Serialize>(value: &T) -> Result<Json> {
    Ok(serde_json::to_value(value)?)
}

fn batch(count: usize) -> Json {
    json!({ "count": count })
}

fn person_emails() -> Filter {
    UserFilter::email(QueryOperator::contains("person"))
}

fn create_user(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client.user().create(UserCreateInput::new("person1")).await?;
        to_json(&user)
    }
    .boxed()
}

fn create_user2(client: &Client) -> StepFuture<'_> {
    async move {
        let input = UserCreateInput::new("person2")
            .email("person2@test.com")
            .age(99);
        let user = client.user().create(input).await?;
        to_json(&user)
    }
    .boxed()
}

/// Nested create of the preference, returning only the name and the
/// preference id.
fn create_user3(client: &Client) -> StepFuture<'_> {
    async move {
        let input = UserCreateInput::new("person3")
            .email("person3@test.com")
            .age(20)
            .user_preference(PreferenceCreate::Create {
                email_updates: true,
            });
        let user = client.user().create(input).await?;
        let projection = Projection::Select(vec![
            SelectField::scalar("name"),
            SelectField::relation(Relation::UserPreference, vec![SelectField::scalar("id")]),
        ]);
        projection.shape_user(client, user).await
    }
    .boxed()
}

fn create_many_users(client: &Client) -> StepFuture<'_> {
    async move {
        let count = client
            .user()
            .create_many(vec![
                UserCreateInput::new("person1").age(20).email("person1@test.com"),
                UserCreateInput::new("person2").age(30).email("person2@test.com"),
                UserCreateInput::new("person3").age(40).email("person3@test.com"),
            ])
            .await?;
        Ok(batch(count))
    }
    .boxed()
}

fn find_unique_user(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .find_unique(UserWhereUnique::age_name(30, "person2"))
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn find_first_user(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::name(QueryOperator::eq("person3")));
        let user = client.user().find_first(args).await?;
        to_json(&user)
    }
    .boxed()
}

fn find_all_users(client: &Client) -> StepFuture<'_> {
    async move { to_json(&client.user().find_many(FindArgs::new()).await?) }.boxed()
}

fn find_many_users(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::email(QueryOperator::contains("test.com")));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_many_distinct_users(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(person_emails()).distinct(EMAIL);
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_many_paginated_users(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new()
            .filter(UserFilter::name(QueryOperator::contains("person")))
            .order_by(AGE, SortOrder::Asc)
            .take(2)
            .skip(1);
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_in(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::name(QueryOperator::is_in([
            "person1", "person2",
        ])));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_not_in(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::name(QueryOperator::not_in([
            "person1", "person2",
        ])));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_less_than(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::age(QueryOperator::lt(30)));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_greater_than(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::age(QueryOperator::gt(30)));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_contains(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::email(QueryOperator::contains(".com")));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_starts_with(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::email(QueryOperator::starts_with("person")));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_ends_with(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::email(QueryOperator::ends_with(".com")));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_and(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(Filter::And(vec![
            UserFilter::email(QueryOperator::starts_with("person")),
            UserFilter::email(QueryOperator::ends_with("@test.com")),
        ]));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn find_where_not(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(Filter::Not(vec![UserFilter::email(
            QueryOperator::starts_with("person1"),
        )]));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn one_to_one_relationship(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::user_preference(
            PreferenceFilter::email_updates(true),
        ));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn one_to_many_relationship(client: &Client) -> StepFuture<'_> {
    async move {
        let args = FindArgs::new().filter(UserFilter::written_posts(
            Quantifier::Every,
            PostFilter::title(QueryOperator::starts_with("Test")),
        ));
        to_json(&client.user().find_many(args).await?)
    }
    .boxed()
}

fn relationship_filtering(client: &Client) -> StepFuture<'_> {
    async move {
        let args =
            FindArgs::new().filter(PostFilter::author_is(UserFilter::age(QueryOperator::eq(20))));
        to_json(&client.post().find_many(args).await?)
    }
    .boxed()
}

fn update_user(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .update(
                UserWhereUnique::email("person3@test.com"),
                UserUpdateInput::new().email("person4@test.com"),
            )
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn update_many_users(client: &Client) -> StepFuture<'_> {
    async move {
        let count = client
            .user()
            .update_many(
                UserFilter::name(QueryOperator::eq("Bob")),
                UserUpdateInput::new().name("Robert"),
            )
            .await?;
        Ok(batch(count))
    }
    .boxed()
}

fn update_user_increment(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .update(
                UserWhereUnique::email("person1@test.com"),
                UserUpdateInput::new().age(IntUpdate::Increment(1)),
            )
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn update_user_and_create_relationship(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .update(
                UserWhereUnique::email("person1@test.com"),
                UserUpdateInput::new().user_preference(PreferenceUpdate::Create {
                    email_updates: true,
                }),
            )
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn update_user_and_connect_relationship(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .update(
                UserWhereUnique::email("person1@test.com"),
                UserUpdateInput::new().user_preference(PreferenceUpdate::Connect {
                    id: "127acbb7-b8b3-461b-957d-2cfec4e524c1".to_string(),
                }),
            )
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn update_user_and_disconnect_relationship(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .update(
                UserWhereUnique::email("person1@test.com"),
                UserUpdateInput::new().user_preference(PreferenceUpdate::Disconnect),
            )
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn delete_user(client: &Client) -> StepFuture<'_> {
    async move {
        let user = client
            .user()
            .delete(UserWhereUnique::email("person3@test.com"))
            .await?;
        to_json(&user)
    }
    .boxed()
}

fn delete_all_users(client: &Client) -> StepFuture<'_> {
    async move { Ok(batch(client.user().delete_many(Filter::All).await?)) }.boxed()
}

fn delete_many_users(client: &Client) -> StepFuture<'_> {
    async move {
        let count = client
            .user()
            .delete_many(UserFilter::age(QueryOperator::lt(18)))
            .await?;
        Ok(batch(count))
    }
    .boxed()
}
