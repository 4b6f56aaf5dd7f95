//! In-memory two-table client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kiln_protocol::ResultRecord;
use kiln_sinks::table::DEDUP_KEY_FIELD;
use kiln_sinks::{SinkError, TableClient};

#[derive(Debug, Default)]
pub struct Tables {
    /// Requests table keyed by request id.
    pub requests: HashMap<String, ResultRecord>,
    /// Detail table keyed by dedup hash.
    pub details: HashMap<String, ResultRecord>,
    /// Request-update order, for idempotency assertions.
    pub update_order: Vec<String>,
}

/// Table client storing rows in hash maps, overwriting by key exactly
/// like the real destinations. Updates can be scripted to fail.
#[derive(Default)]
pub struct InMemoryTableClient {
    tables: Arc<Mutex<Tables>>,
    fail_updates: bool,
}

impl InMemoryTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_updates() -> Self {
        Self {
            fail_updates: true,
            ..Self::default()
        }
    }

    /// Shared handle to the stored tables, usable after the client
    /// moves into a writer.
    pub fn tables(&self) -> Arc<Mutex<Tables>> {
        self.tables.clone()
    }
}

impl TableClient for InMemoryTableClient {
    async fn update_request(&mut self, item: ResultRecord) -> Result<(), SinkError> {
        if self.fail_updates {
            return Err(SinkError::Table("scripted update failure".to_string()));
        }
        let Some(key) = item.get("request_id").and_then(|v| v.as_str()) else {
            return Err(SinkError::Table("item missing request_id".to_string()));
        };
        let key = key.to_string();
        let mut tables = self.tables.lock().unwrap();
        tables.update_order.push(key.clone());
        tables.requests.insert(key, item);
        Ok(())
    }

    async fn put_detail(&mut self, item: ResultRecord) -> Result<(), SinkError> {
        let Some(key) = item.get(DEDUP_KEY_FIELD).and_then(|v| v.as_str()) else {
            return Err(SinkError::Table("item missing dedup key".to_string()));
        };
        let key = key.to_string();
        self.tables.lock().unwrap().details.insert(key, item);
        Ok(())
    }
}
