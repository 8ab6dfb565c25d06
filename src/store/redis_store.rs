use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use tracing::debug;

use super::{
    BatchOp, KvStore, StoreBackend, StoreError, StoreStats, StoredValue, WriteBatch, ttl_seconds,
};

const SCAN_COUNT: usize = 250;

const DEL_IF_VALUE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis backend over a `deadpool-redis` connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a `PING`.
    pub async fn connect(
        url: &str,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut config = Config::from_url(url);
        config.pool = Some(PoolConfig {
            max_size: pool_size,
            timeouts: Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(timeout),
            },
            ..PoolConfig::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| StoreError::unavailable(format!("failed to create pool: {err}")))?;

        let store = Self { pool };
        store.ping().await?;
        Ok(store)
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        let mut conn = self.conn().await?;
        let (value, ttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(value.map(|value| StoredValue {
            value,
            ttl: remaining(ttl),
        }))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn del_if_value(&self, key: &str, value: &[u8]) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::Script::new(DEL_IF_VALUE_SCRIPT)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn().await?;
        let ttl: i64 = conn.ttl(key).await?;
        Ok(remaining(ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let updated: bool = conn.expire(key, ttl_seconds(ttl) as i64).await?;
        Ok(updated)
    }

    async fn scan_match(
        &self,
        pattern: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if let Some(limit) = limit {
                if keys.len() >= limit {
                    keys.truncate(limit);
                    break;
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, found = keys.len(), "scan complete");
        Ok(keys)
    }

    async fn hset_multiple(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(members)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // Explicit MGET: the typed helper downgrades a single key to GET.
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn execute_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for op in batch.into_ops() {
            match op {
                BatchOp::SetEx { key, value, ttl } => {
                    pipe.cmd("SETEX")
                        .arg(key)
                        .arg(ttl_seconds(ttl))
                        .arg(value)
                        .ignore();
                }
                BatchOp::HSet { key, fields } => {
                    if fields.is_empty() {
                        continue;
                    }
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
                BatchOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(score).arg(member).ignore();
                }
                BatchOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds(ttl)).ignore();
                }
            }
        }

        let mut conn = self.conn().await?;
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut conn = self.conn().await?;
        let keys: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;

        Ok(StoreStats {
            keys,
            used_memory: parse_used_memory(&info),
        })
    }

    async fn flush_db(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}

/// `TTL` replies -2 for a missing key and -1 for a persistent one.
fn remaining(ttl: i64) -> Option<Duration> {
    u64::try_from(ttl).ok().map(Duration::from_secs)
}

fn parse_used_memory(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory_human:"))
        .map(|value| value.trim().to_string())
}
