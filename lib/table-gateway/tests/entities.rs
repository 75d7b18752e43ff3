#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use common::{Author, AuthorRole, Role, author, authors, init_tracing, now};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use table_gateway::{
    Dao, EntityConverter, EntityDao, GatewayError, HookEvent, MemoryExecutor, Table, Timestamps,
    Value,
};

#[derive(Table, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
#[table(name = "users", primary_key = "user_id", entity = "UserDao")]
struct User {
    user_id: Option<i64>,
    #[column(name = "display_name")]
    display_name_text: String,
    birth_date: Option<NaiveDate>,
    #[serde(skip)]
    #[column(skip)]
    cache: Option<String>,
    updated_date: Option<NaiveDate>,
}

#[test]
fn derived_metadata_follows_conventions() {
    assert_eq!(Author::entity_type(), "Author");
    assert_eq!(Author::table_name(), "author");
    assert_eq!(Author::primary_key(), "author_id");
    assert_eq!(
        Author::columns(),
        &["author_id", "name", "created_at", "updated_at"]
    );
    assert_eq!(
        Author::column_types(),
        &["bigint", "text", "datetime", "datetime"]
    );
    assert!(Author::insert_serial());
    assert_eq!(Author::timestamps(), Timestamps::default());

    assert_eq!(Role::table_name(), "role");
    assert_eq!(Role::timestamps(), Timestamps::none());

    assert_eq!(AuthorRole::table_name(), "author_role");
    assert!(!AuthorRole::insert_serial());
}

#[test]
fn derive_attributes_override_conventions() {
    assert_eq!(User::entity_type(), "UserDao");
    assert_eq!(User::table_name(), "users");
    assert_eq!(User::primary_key(), "user_id");
    assert_eq!(
        User::columns(),
        &["user_id", "display_name", "birth_date", "updated_date"]
    );
    assert_eq!(
        User::json_keys(),
        &["userId", "displayNameText", "birthDate", "updatedDate"]
    );
    assert_eq!(User::column_types(), &["bigint", "text", "date", "date"]);
    assert_eq!(
        User::timestamps(),
        Timestamps {
            updated_date: Some("updated_date".to_string()),
            ..Timestamps::none()
        }
    );
}

#[test]
fn converter_maps_json_keys_to_columns() {
    let converter = EntityConverter::for_table::<User>();
    let user = User {
        user_id: Some(3),
        display_name_text: "asao".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1990, 4, 1),
        cache: None,
        updated_date: None,
    };

    let row = converter.to_row(&user).unwrap();
    assert_eq!(
        row.keys().collect::<Vec<_>>(),
        vec!["user_id", "display_name", "birth_date", "updated_date"]
    );
    assert_eq!(row.get("display_name"), Some(&Value::from("asao")));
    assert_eq!(
        row.get("birth_date"),
        Some(&Value::Date(NaiveDate::from_ymd_opt(1990, 4, 1).unwrap()))
    );

    let back: User = converter.to_entity(&row).unwrap();
    assert_eq!(back, user);
}

#[tokio::test]
async fn save_inserts_then_updates() {
    init_tracing();
    let executor = MemoryExecutor::new();
    let dao = authors(executor.clone());

    let mut record = dao.create(converter_row("asao")).unwrap();
    assert!(!dao.is_retrieved(&record));
    dao.save(&mut record).await.unwrap();

    assert!(dao.is_retrieved(&record));
    assert_eq!(record.author_id, Some(1));
    assert_eq!(record.created_at, Some(now()));
    assert_eq!(record.updated_at, Some(now()));

    record.entity_mut().name = "renamed".to_string();
    dao.save(&mut record).await.unwrap();

    let rows = executor.rows("author").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("renamed")));

    let loaded = dao.find(1i64).await.unwrap().unwrap();
    assert!(loaded.is_persisted());
    assert_eq!(loaded.entity(), record.entity());
}

#[tokio::test]
async fn removed_records_are_gone() {
    let executor = MemoryExecutor::new();
    let dao = authors(executor.clone());
    let mut record = table_gateway::Record::new(author("asao"));
    dao.save(&mut record).await.unwrap();

    assert_eq!(dao.remove(&mut record).await.unwrap(), 1);
    assert!(dao.is_deleted(&record));
    assert!(dao.find(1i64).await.unwrap().is_none());
    assert!(matches!(
        dao.save(&mut record).await,
        Err(GatewayError::NotFound(_))
    ));
}

#[tokio::test]
async fn entity_hooks_wrap_row_hooks() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut builder = Dao::builder(MemoryExecutor::new(), Author::table_info());
    for event in [
        HookEvent::Creating,
        HookEvent::Created,
        HookEvent::Saving,
        HookEvent::Inserting,
        HookEvent::Inserted,
        HookEvent::Saved,
        HookEvent::Removing,
        HookEvent::Deleting,
        HookEvent::Deleted,
        HookEvent::Removed,
    ] {
        let events = events.clone();
        builder = builder.hook(event, move |_| {
            events.lock().unwrap().push(event);
            Ok(())
        });
    }
    let dao: EntityDao<Author, _> = EntityDao::with_dao(builder.build().unwrap());

    let mut record = dao.create(converter_row("asao")).unwrap();
    dao.save(&mut record).await.unwrap();
    dao.remove(&mut record).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            HookEvent::Creating,
            HookEvent::Created,
            HookEvent::Saving,
            HookEvent::Inserting,
            HookEvent::Inserted,
            HookEvent::Saved,
            HookEvent::Removing,
            HookEvent::Deleting,
            HookEvent::Deleted,
            HookEvent::Removed,
        ]
    );
}

fn converter_row(name: &str) -> table_gateway::Row {
    let mut row = table_gateway::Row::new();
    row.insert("name".to_string(), Value::from(name));
    row
}
