#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use table_gateway::{
    Dao, EntityDao, FixedClock, GatewayDatetime, MemoryExecutor, Table, TableRegistry,
};
use tracing_subscriber::EnvFilter;

#[derive(Table, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Author {
    pub author_id: Option<i64>,
    pub name: String,
    pub created_at: Option<GatewayDatetime>,
    pub updated_at: Option<GatewayDatetime>,
}

#[derive(Table, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[table(name = "role")]
pub struct Role {
    pub role_id: Option<i64>,
    pub name: String,
}

#[derive(Table, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[table(insert_serial = false)]
pub struct AuthorRole {
    pub author_id: i64,
    pub role_id: i64,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn now() -> GatewayDatetime {
    GatewayDatetime::parse("2014-05-07 05:57:00", None).unwrap()
}

pub fn registry() -> TableRegistry {
    TableRegistry::new()
        .with_table::<Author>()
        .with_table::<Role>()
        .with_table::<AuthorRole>()
}

pub fn authors(executor: MemoryExecutor) -> EntityDao<Author, MemoryExecutor> {
    let dao = Dao::builder(executor, Author::table_info())
        .clock(FixedClock(now()))
        .build()
        .unwrap();
    EntityDao::with_dao(dao)
}

pub fn roles(executor: MemoryExecutor) -> EntityDao<Role, MemoryExecutor> {
    EntityDao::of(executor)
}

pub fn author(name: &str) -> Author {
    Author {
        author_id: None,
        name: name.to_string(),
        created_at: None,
        updated_at: None,
    }
}

pub fn role(name: &str) -> Role {
    Role {
        role_id: None,
        name: name.to_string(),
    }
}
