use std::collections::HashMap;
use std::sync::RwLock;

use flume::{Receiver, Sender};

use super::{Db, DbNotification, DbOp};

type Row = HashMap<String, String>;
type Table = HashMap<String, Row>;

/// In-process `Db` backend. Mirrors the teacher's `StateManager` shape: a
/// `RwLock`-guarded map for reads, plus a list of subscriber senders per
/// table that every write fans out to.
#[derive(Default)]
pub struct MemoryDb {
    tables: RwLock<HashMap<String, Table>>,
    subscribers: RwLock<HashMap<String, Vec<Sender<DbNotification>>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, table: &str, notification: DbNotification) {
        let subs = self.subscribers.read().expect("subscribers lock poisoned");
        if let Some(senders) = subs.get(table) {
            for sender in senders {
                // A dropped receiver just means that subscriber stopped watching.
                let _ = sender.send(notification.clone());
            }
        }
    }
}

impl Db for MemoryDb {
    fn hset(&self, table: &str, key: &str, field: &str, value: &str) {
        {
            let mut tables = self.tables.write().expect("tables lock poisoned");
            tables
                .entry(table.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        }
        self.publish(
            table,
            DbNotification {
                key: key.to_string(),
                field: field.to_string(),
                value: Some(value.to_string()),
                op: DbOp::Set,
            },
        );
    }

    fn hget(&self, table: &str, key: &str, field: &str) -> Option<String> {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables.get(table)?.get(key)?.get(field).cloned()
    }

    fn hdel(&self, table: &str, key: &str, field: &str) {
        {
            let mut tables = self.tables.write().expect("tables lock poisoned");
            if let Some(rows) = tables.get_mut(table) {
                if let Some(row) = rows.get_mut(key) {
                    row.remove(field);
                    if row.is_empty() {
                        rows.remove(key);
                    }
                }
            }
        }
        self.publish(
            table,
            DbNotification {
                key: key.to_string(),
                field: field.to_string(),
                value: None,
                op: DbOp::Del,
            },
        );
    }

    fn keys(&self, table: &str) -> Vec<String> {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn subscribe(&self, table: &str) -> Receiver<DbNotification> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .entry(table.to_string())
            .or_default()
            .push(tx);
        rx
    }
}
