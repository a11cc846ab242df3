//! In-process store backend.
//!
//! Rows live in memory for the lifetime of the process. Useful for local
//! development without a Spanner emulator and as the backend for handler tests.

use super::{Filter, OrderBy, Row, Store, Table};
use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Default)]
struct TableData {
    last_id: i64,
    rows: Vec<Row>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, TableData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Total order over JSON values used for `ORDER BY`.
///
/// Missing/null sort first, then booleans, then numbers, then strings.
/// Arrays and objects sort last and compare equal to each other.
fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>> {
        let tables = self.tables.lock();
        let mut rows: Vec<Row> = tables
            .get(&table)
            .map(|data| {
                data.rows
                    .iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            // stable sort keeps insertion order among ties
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn insert(&self, table: Table, mut row: Row) -> Result<Row> {
        let mut tables = self.tables.lock();
        let data = tables.entry(table).or_default();

        data.last_id += 1;
        row.insert("id".to_string(), JsonValue::from(data.last_id));
        data.rows.push(row.clone());

        tracing::debug!("Inserted {} row with id: {}", table, data.last_id);
        Ok(row)
    }

    async fn update(&self, table: Table, row: Row, filter: &Filter) -> Result<Row> {
        let mut tables = self.tables.lock();
        let data = tables.entry(table).or_default();

        let mut matching = data
            .rows
            .iter_mut()
            .filter(|existing| filter.matches(existing));

        let Some(target) = matching.next() else {
            bail!("No {} row returned for update", table);
        };
        if matching.next().is_some() {
            bail!("Multiple {} rows matched a single-row update", table);
        }

        for (field, value) in row {
            target.insert(field, value);
        }

        Ok(target.clone())
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize> {
        let mut tables = self.tables.lock();
        let data = tables.entry(table).or_default();

        let before = data.rows.len();
        data.rows.retain(|row| !filter.matches(row));
        let removed = before - data.rows.len();

        if removed == 0 {
            bail!("No {} row returned for delete", table);
        }
        tracing::debug!("Deleted {} {} row(s)", removed, table);
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
