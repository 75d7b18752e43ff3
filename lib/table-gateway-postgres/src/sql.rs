//! SQL statement builders.
//!
//! Every builder returns the statement text together with the values to
//! bind, in placeholder order. `Null` values are written inline as `NULL`
//! and never bound.

use table_gateway::{Delete, Filter, Join, Order, Query, Row, Update, Value};

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Collects bound values and hands out `$n` placeholders.
#[derive(Default)]
struct Params {
    values: Vec<Value>,
}

impl Params {
    fn placeholder(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value.clone());
        format!("${}", self.values.len())
    }
}

fn comparison(params: &mut Params, field: &str, op: &str, value: &Value) -> String {
    format!("{} {} {}", field, op, params.placeholder(value))
}

fn membership(params: &mut Params, field: &str, value: &Value) -> String {
    match value {
        Value::Strings(_) => format!("{} = ANY({})", field, params.placeholder(value)),
        Value::Json(serde_json::Value::Array(items)) => {
            if items.is_empty() {
                return "FALSE".to_string();
            }
            let placeholders: Vec<String> = items
                .iter()
                .map(|item| params.placeholder(&Value::from_json(item.clone())))
                .collect();
            format!("{} IN ({})", field, placeholders.join(", "))
        }
        other => comparison(params, field, "=", other),
    }
}

/// Build a WHERE clause from filters.
fn build_where_clause(params: &mut Params, filters: &[Filter]) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(field, value) => comparison(params, field, "=", value),
            Filter::Ne(field, value) => comparison(params, field, "!=", value),
            Filter::Gt(field, value) => comparison(params, field, ">", value),
            Filter::Gte(field, value) => comparison(params, field, ">=", value),
            Filter::Lt(field, value) => comparison(params, field, "<", value),
            Filter::Lte(field, value) => comparison(params, field, "<=", value),
            Filter::In(field, value) => membership(params, field, value),
            Filter::IsNull(field) => format!("{} IS NULL", field),
            Filter::IsNotNull(field) => format!("{} IS NOT NULL", field),
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Build ORDER BY clause.
fn build_order_clause(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", field, dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

/// Build JOIN clauses.
fn build_join_clause(main_table: &str, joins: &[Join]) -> String {
    joins
        .iter()
        .map(|join| {
            format!(
                " JOIN {} ON {}.{} = {}.{}",
                join.table, main_table, join.left_field, join.table, join.right_field
            )
        })
        .collect()
}

/// SELECT for a query. Without explicit columns a joined query returns only
/// the main table's columns.
pub fn select(query: &Query) -> Statement {
    let mut params = Params::default();

    let columns = if !query.columns.is_empty() {
        query.columns.join(", ")
    } else if query.joins.is_empty() {
        "*".to_string()
    } else {
        format!("{}.*", query.table)
    };

    let mut sql = format!(
        "SELECT {} FROM {}{}",
        columns,
        query.table,
        build_join_clause(&query.table, &query.joins)
    );
    sql.push_str(&build_where_clause(&mut params, &query.filters));
    sql.push_str(&build_order_clause(&query.order_by));
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = query.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    Statement {
        sql,
        params: params.values,
    }
}

/// SELECT EXISTS for a query's table, joins and filters.
pub fn exists(query: &Query) -> Statement {
    let mut params = Params::default();
    let mut sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {}{}",
        query.table,
        build_join_clause(&query.table, &query.joins)
    );
    sql.push_str(&build_where_clause(&mut params, &query.filters));
    sql.push(')');

    Statement {
        sql,
        params: params.values,
    }
}

/// INSERT of one row, optionally returning `returning`.
pub fn insert(table: &str, row: &Row, returning: Option<&str>) -> Statement {
    let mut params = Params::default();

    let mut sql = if row.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        let values: Vec<String> = row.values().map(|v| params.placeholder(v)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            values.join(", ")
        )
    };
    if let Some(key) = returning {
        sql.push_str(&format!(" RETURNING {}", key));
    }

    Statement {
        sql,
        params: params.values,
    }
}

/// UPDATE with SET parameters numbered before WHERE parameters.
///
/// Returns `None` when there is nothing to set.
pub fn update(update: &Update) -> Option<Statement> {
    if update.values.is_empty() {
        return None;
    }

    let mut params = Params::default();
    let assignments: Vec<String> = update
        .values
        .iter()
        .map(|(column, value)| format!("{} = {}", column, params.placeholder(value)))
        .collect();

    let mut sql = format!("UPDATE {} SET {}", update.table, assignments.join(", "));
    sql.push_str(&build_where_clause(&mut params, &update.filters));

    Some(Statement {
        sql,
        params: params.values,
    })
}

/// DELETE matching filters.
pub fn delete(delete: &Delete) -> Statement {
    let mut params = Params::default();
    let mut sql = format!("DELETE FROM {}", delete.table);
    sql.push_str(&build_where_clause(&mut params, &delete.filters));

    Statement {
        sql,
        params: params.values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn select_with_filters_order_and_paging() {
        let query = Query::for_table("users")
            .eq("status", 1i64)
            .gte("user_id", 10i64)
            .is_null("deleted_at")
            .order_by("name", Order::Asc)
            .order_by("user_id", Order::Desc)
            .limit(5)
            .offset(10);

        assert_eq!(
            select(&query),
            Statement {
                sql: "SELECT * FROM users WHERE status = $1 AND user_id >= $2 AND deleted_at IS NULL \
                      ORDER BY name ASC, user_id DESC LIMIT 5 OFFSET 10"
                    .to_string(),
                params: vec![Value::Int(1), Value::Int(10)],
            }
        );
    }

    #[test]
    fn joined_select_returns_main_table_columns() {
        let query = Query::for_table("role")
            .join("author_role", "role_id", "role_id")
            .eq("author_role.author_id", 7i64);

        assert_eq!(
            select(&query).sql,
            "SELECT role.* FROM role JOIN author_role ON role.role_id = author_role.role_id \
             WHERE author_role.author_id = $1"
        );
    }

    #[test]
    fn explicit_columns_are_listed() {
        let query = Query::for_table("users").columns(["user_id", "name"]);
        assert_eq!(select(&query).sql, "SELECT user_id, name FROM users");
    }

    #[test]
    fn membership_filters() {
        let strings = Query::for_table("users").r#in("name", vec!["a", "b"]);
        let statement = select(&strings);
        assert_eq!(statement.sql, "SELECT * FROM users WHERE name = ANY($1)");
        assert_eq!(statement.params, vec![Value::from(vec!["a", "b"])]);

        let ids = Query::for_table("users").r#in("user_id", serde_json::json!([1, 2, 3]));
        assert_eq!(
            select(&ids).sql,
            "SELECT * FROM users WHERE user_id IN ($1, $2, $3)"
        );

        let none = Query::for_table("users").r#in("user_id", serde_json::json!([]));
        assert_eq!(select(&none).sql, "SELECT * FROM users WHERE FALSE");
    }

    #[test]
    fn null_values_are_inlined() {
        let query = Query::for_table("users").eq("email", Value::Null).eq("status", 1i64);
        let statement = select(&query);
        assert_eq!(
            statement.sql,
            "SELECT * FROM users WHERE email = NULL AND status = $1"
        );
        assert_eq!(statement.params, vec![Value::Int(1)]);
    }

    #[test]
    fn insert_returning_serial_key() {
        let values = row(&[("name", Value::from("asao")), ("email", Value::Null)]);
        assert_eq!(
            insert("users", &values, Some("user_id")),
            Statement {
                sql: "INSERT INTO users (name, email) VALUES ($1, NULL) RETURNING user_id"
                    .to_string(),
                params: vec![Value::from("asao")],
            }
        );
        assert_eq!(
            insert("users", &Row::new(), Some("user_id")).sql,
            "INSERT INTO users DEFAULT VALUES RETURNING user_id"
        );
    }

    #[test]
    fn update_numbers_set_before_where() {
        let values = row(&[("name", Value::from("renamed")), ("status", Value::Int(2))]);
        let statement = update(&Update::for_table("users", values).eq("user_id", 7i64)).unwrap();

        assert_eq!(
            statement.sql,
            "UPDATE users SET name = $1, status = $2 WHERE user_id = $3"
        );
        assert_eq!(
            statement.params,
            vec![Value::from("renamed"), Value::Int(2), Value::Int(7)]
        );
        assert!(update(&Update::for_table("users", Row::new())).is_none());
    }

    #[test]
    fn delete_and_exists() {
        let delete_statement = delete(&Delete::for_table("author_role").eq("author_id", 7i64));
        assert_eq!(
            delete_statement.sql,
            "DELETE FROM author_role WHERE author_id = $1"
        );

        let exists_statement = exists(&Query::for_table("users").eq("name", "asao"));
        assert_eq!(
            exists_statement.sql,
            "SELECT EXISTS(SELECT 1 FROM users WHERE name = $1)"
        );
    }
}
