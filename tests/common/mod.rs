//! Scriptable in-memory backend for lifecycle tests.
//!
//! The SQL text drives the behavior:
//! - `FAIL`: execution fails; a stream yields one error
//! - `WAIT`: execution parks until [`MockState::gate`] is notified
//! - `ROWS <n>`: returns `n` rows `{"n": i}`
//! - `BROKEN`: a stream yields two rows, then an error
//! - anything else: one row affected, no rows

#![allow(dead_code)]

use async_trait::async_trait;
use dblink::db::{Backend, NativeConnection};
use dblink::models::{NativeResult, QueryParam, Row};
use dblink::{DbError, DbResult, Handler, PoolOptions};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub executes: AtomicUsize,
    pub streams: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub gate: Notify,
    pub last_execution: Mutex<Option<(String, Vec<QueryParam>)>>,
}

impl MockState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn last_execution(&self) -> Option<(String, Vec<QueryParam>)> {
        self.last_execution.lock().unwrap().clone()
    }
}

pub struct MockBackend {
    pub state: Arc<MockState>,
}

struct MockConnection {
    state: Arc<MockState>,
}

fn rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let mut row = Row::new();
            row.insert("n".to_string(), json!(i));
            row
        })
        .collect()
}

fn row_count(sql: &str) -> Option<usize> {
    sql.strip_prefix("ROWS ")
        .and_then(|n| n.trim().parse().ok())
}

fn failure() -> DbError {
    DbError::database("mock failure", Some("42000".to_string()), "fix the query")
}

#[async_trait]
impl NativeConnection for MockConnection {
    async fn execute(&mut self, sql: &str, args: &[QueryParam]) -> DbResult<NativeResult> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        *self.state.last_execution.lock().unwrap() = Some((sql.to_string(), args.to_vec()));

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if sql == "WAIT" {
            self.state.gate.notified().await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if sql == "FAIL" {
            return Err(failure());
        }
        if let Some(n) = row_count(sql) {
            return Ok(NativeResult {
                rows: Some(rows(n)),
                rows_affected: None,
            });
        }
        Ok(NativeResult {
            rows: None,
            rows_affected: Some(1),
        })
    }

    fn open_stream<'a>(
        &'a mut self,
        sql: &'a str,
        _args: &'a [QueryParam],
    ) -> BoxStream<'a, DbResult<Row>> {
        self.state.streams.fetch_add(1, Ordering::SeqCst);
        let items: Vec<DbResult<Row>> = match sql {
            "FAIL" => vec![Err(failure())],
            "BROKEN" => {
                let mut items: Vec<DbResult<Row>> = rows(2).into_iter().map(Ok).collect();
                items.push(Err(failure()));
                items
            }
            _ => rows(row_count(sql).unwrap_or(0)).into_iter().map(Ok).collect(),
        };
        stream::iter(items).boxed()
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> DbResult<Box<dyn NativeConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

/// A handler over the mock backend with `max_connections` slots.
pub async fn mock_handler(max_connections: u32) -> (Handler, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let backend = Arc::new(MockBackend {
        state: Arc::clone(&state),
    });
    let options = PoolOptions {
        max_connections: Some(max_connections),
        min_connections: Some(0),
        ..PoolOptions::default()
    };
    let handler = Handler::with_backend(backend, &options)
        .await
        .expect("mock handler");
    (handler, state)
}
