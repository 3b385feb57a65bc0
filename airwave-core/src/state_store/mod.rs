//! Redis-backed State Store: the sole coordination substrate for
//! cross-process invariants (the livestream slot, quota counters,
//! watchdog/observer leases) plus the pub/sub channel set the Event Bus
//! rides on.

pub mod lock;

use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use lock::DistributedLock;

#[derive(Clone)]
pub struct StateStore {
    conn: ConnectionManager,
    client: redis::Client,
}

impl StateStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(crate::Error::from)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { conn, client })
    }

    #[must_use]
    pub fn lock(&self) -> DistributedLock {
        DistributedLock::new(self.conn.clone())
    }

    /// Health probe: a bare `PING`, used by the readiness endpoint.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    /// Atomic `SET key value NX [EX ttl]`. Returns whether this call won the
    /// race to set the key.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_seconds {
            cmd.arg("EX").arg(ttl);
        }
        let result: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(result.is_some())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_seconds as i64).await?;
        Ok(())
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    pub async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(key, 1).await?)
    }

    /// Appends `value` to the tail of the list at `key` — used for the
    /// per-queue song order list, where tail is most-recently-enqueued.
    pub async fn list_push_tail(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    /// Returns a `[start, stop]` inclusive slice of the list at `key`.
    /// Negative indices count from the tail, Redis-list-style (`-1` is the
    /// last element).
    pub async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    /// Removes up to `count` occurrences of `value` from the list at `key`
    /// (0 removes all occurrences). Returns the number removed.
    pub async fn list_remove(&self, key: &str, count: isize, value: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.lrem(key, count, value).await?)
    }

    pub async fn list_len(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw, ttl_seconds).await
    }

    /// Compare-and-delete/replace used when releasing the livestream slot:
    /// only clears `key` if its current value still matches `expected`,
    /// guarding against a stale release racing a fresh reservation.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let script = Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            ",
        );
        let result: i32 = script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    /// Publishes `payload` on `channel`. Fire-and-forget: a failure to
    /// deliver to a slow or absent subscriber never blocks or errors the
    /// publisher's caller beyond the publish call itself.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Opens a dedicated pub/sub connection subscribed to `channel`. No
    /// message persistence: only publishes that arrive after this call
    /// returns (and before the subscription is dropped) are seen.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Subscription { pubsub })
    }
}

pub struct Subscription {
    pubsub: PubSub,
}

impl Subscription {
    /// Awaits the next message on this subscription's channel(s).
    pub async fn recv(&mut self) -> Result<Option<String>> {
        use futures::StreamExt;
        match self.pubsub.on_message().next().await {
            Some(msg) => Ok(Some(msg.get_payload()?)),
            None => Ok(None),
        }
    }
}
