//! Shared fixtures for unit and integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::clock::Clock;
use crate::db::adapter::DatabaseAdapter;
use crate::db::memory::{MemoryDb, Row};
use crate::observe::{MeasureLabel, MeasureOutcome, MeasurementSink};
use crate::plan::{ColumnSelection, TablePlan};
use crate::schema::{ColumnDef, TableDefinition};

pub fn memory_db(name: &str) -> MemoryDb {
    MemoryDb::new(name)
}

pub fn memory_source(name: &str) -> Arc<dyn DatabaseAdapter> {
    Arc::new(MemoryDb::new(name))
}

/// Fixed timestamp helper.
pub fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

/// A clock whose "now" is advanced explicitly by the test.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

/// Sink capturing measurements and log lines for assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<(MeasureLabel, MeasureOutcome)>>>,
    logs: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _)| label.to_string())
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }
}

impl MeasurementSink for RecordingSink {
    fn record(&self, label: &MeasureLabel, _duration: StdDuration, outcome: MeasureOutcome) {
        self.records.lock().unwrap().push((label.clone(), outcome));
    }

    fn log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}

/// Builder for [`TablePlan`]s with sensible test defaults.
pub struct PlanBuilder {
    table_name: String,
    source_table_name: String,
    columns: ColumnSelection,
    consistency: bool,
    always_sync: bool,
    refresh_recent: crate::plan::RefreshRecent,
}

pub fn plan_builder(table_name: &str) -> PlanBuilder {
    PlanBuilder {
        table_name: table_name.to_string(),
        source_table_name: table_name.to_string(),
        columns: ColumnSelection::all(),
        consistency: false,
        always_sync: false,
        refresh_recent: crate::plan::RefreshRecent::Disabled,
    }
}

impl PlanBuilder {
    pub fn source_table_name(mut self, name: &str) -> Self {
        self.source_table_name = name.to_string();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = ColumnSelection::Only(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn consistency(mut self) -> Self {
        self.consistency = true;
        self
    }

    pub fn always_sync(mut self) -> Self {
        self.always_sync = true;
        self
    }

    pub fn refresh_recent(mut self) -> Self {
        self.refresh_recent = crate::plan::RefreshRecent::Enabled(true);
        self
    }

    pub fn build(self, source: Arc<dyn DatabaseAdapter>) -> TablePlan {
        TablePlan {
            table_name: self.table_name,
            source_table_name: self.source_table_name,
            columns: self.columns,
            indexes: Vec::new(),
            primary_key: None,
            batch_load: true,
            refresh_recent: self.refresh_recent,
            consistency: self.consistency,
            always_sync: self.always_sync,
            type_casts: BTreeMap::new(),
            source,
        }
    }

    /// Builds against a throwaway source, for tests that never touch it.
    pub fn build_without_source(self) -> TablePlan {
        self.build(memory_source("unused"))
    }
}

/// Standard `users` table used across tests: id plus two timestamps.
pub fn users_definition(name: &str) -> TableDefinition {
    TableDefinition {
        name: name.to_string(),
        columns: vec![
            ColumnDef::new("id", "bigint").primary_key(),
            ColumnDef::new("created_at", "timestamptz"),
            ColumnDef::new("updated_at", "timestamptz"),
        ],
        primary_key: vec!["id".to_string()],
        indexes: Vec::new(),
    }
}

/// One `users` row with matching created/updated timestamps.
pub fn user_row(id: i64, at: DateTime<Utc>) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), id.to_string());
    row.insert("created_at".to_string(), at.to_rfc3339());
    row.insert("updated_at".to_string(), at.to_rfc3339());
    row
}

/// One `users` row with distinct creation and update times.
pub fn user_row_updated(id: i64, created: DateTime<Utc>, updated: DateTime<Utc>) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), id.to_string());
    row.insert("created_at".to_string(), created.to_rfc3339());
    row.insert("updated_at".to_string(), updated.to_rfc3339());
    row
}
