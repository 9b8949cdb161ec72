//! Shape of a production `Db` backend, not built by default.
//!
//! A real deployment talks to Redis through the same table/channel
//! conventions `swss-common` uses (`<TABLE>|<key>` hash keys, a
//! `<TABLE>_CHANNEL@<db>` keyspace-notification pub/sub channel). Wiring that
//! up needs a live Redis server to test against, which this exercise does
//! not depend on; this module exists to record the intended shape.

use flume::Receiver;

use super::{Db, DbNotification};

pub struct RedisDb {
    client: redis::Client,
}

impl RedisDb {
    pub fn connect(url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

impl Db for RedisDb {
    fn hset(&self, _table: &str, _key: &str, _field: &str, _value: &str) {
        unimplemented!("redis-backend is a documented shape, not a shipped implementation")
    }

    fn hget(&self, _table: &str, _key: &str, _field: &str) -> Option<String> {
        unimplemented!("redis-backend is a documented shape, not a shipped implementation")
    }

    fn hdel(&self, _table: &str, _key: &str, _field: &str) {
        unimplemented!("redis-backend is a documented shape, not a shipped implementation")
    }

    fn keys(&self, _table: &str) -> Vec<String> {
        unimplemented!("redis-backend is a documented shape, not a shipped implementation")
    }

    fn subscribe(&self, _table: &str) -> Receiver<DbNotification> {
        unimplemented!("redis-backend is a documented shape, not a shipped implementation")
    }
}
