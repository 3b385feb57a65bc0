//! Distributed lock built on Redis `SET NX EX`, used wherever the control
//! plane needs a single-runner guarantee across replicas (the livestream
//! watchdog, the source observer poll loop).

use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::Script;
use std::future::Future;

use crate::ids::generate_id;
use crate::{Error, Result};

#[derive(Clone)]
pub struct DistributedLock {
    redis: RedisConnectionManager,
}

impl DistributedLock {
    #[must_use]
    pub const fn new(redis: RedisConnectionManager) -> Self {
        Self { redis }
    }

    /// Acquires a lock, returning the opaque value that must be presented to
    /// release it. `None` means another holder currently has it.
    pub async fn acquire(&self, key: &str, ttl_seconds: u64) -> Result<Option<String>> {
        let lock_key = format!("lock:{key}");
        let lock_value = generate_id();

        let mut conn = self.redis.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(&lock_value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Internal(format!("failed to acquire lock: {e}")))?;

        if result.is_some() {
            tracing::debug!(lock_key = %lock_key, ttl_seconds, "lock acquired");
            Ok(Some(lock_value))
        } else {
            tracing::debug!(lock_key = %lock_key, "lock already held");
            Ok(None)
        }
    }

    /// Releases a lock. Only succeeds if `lock_value` still matches what's
    /// stored, so a holder whose lease already expired and was reacquired by
    /// someone else can't release the new holder's lock.
    pub async fn release(&self, key: &str, lock_value: &str) -> Result<bool> {
        let lock_key = format!("lock:{key}");

        let script = Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.redis.clone();

        let result: i32 = script
            .key(&lock_key)
            .arg(lock_value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Internal(format!("failed to release lock: {e}")))?;

        let released = result == 1;
        if released {
            tracing::debug!(lock_key = %lock_key, "lock released");
        } else {
            tracing::warn!(lock_key = %lock_key, "lock release failed: value mismatch or expired");
        }

        Ok(released)
    }

    /// Runs `operation` with the lock held, releasing it afterward regardless
    /// of outcome. Fails immediately if the lock can't be acquired.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, ttl_seconds: u64, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock_value = self
            .acquire(key, ttl_seconds)
            .await?
            .ok_or_else(|| Error::Internal(format!("failed to acquire lock: {key}")))?;

        let result = operation().await;

        if let Err(e) = self.release(key, &lock_value).await {
            tracing::error!(key = %key, error = %e, "failed to release lock after operation");
        }

        result
    }

    /// Like [`with_lock`](Self::with_lock), but returns `Ok(None)` instead of
    /// erroring when the lock is already held — used by pollers that should
    /// just skip a tick rather than fail when another replica is active.
    pub async fn try_with_lock<F, Fut, T>(
        &self,
        key: &str,
        ttl_seconds: u64,
        operation: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock_value = match self.acquire(key, ttl_seconds).await? {
            Some(value) => value,
            None => return Ok(None),
        };

        let result = operation().await;

        if let Err(e) = self.release(key, &lock_value).await {
            tracing::error!(key = %key, error = %e, "failed to release lock after operation");
        }

        result.map(Some)
    }

    /// Extends TTL on a held lock. Fails closed (`false`) if `lock_value`
    /// doesn't match the current holder.
    pub async fn extend(&self, key: &str, lock_value: &str, ttl_seconds: u64) -> Result<bool> {
        let lock_key = format!("lock:{key}");

        let script = Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("EXPIRE", KEYS[1], ARGV[2])
            else
                return 0
            end
            "#,
        );

        let mut conn = self.redis.clone();

        let result: i32 = script
            .key(&lock_key)
            .arg(lock_value)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Internal(format!("failed to extend lock: {e}")))?;

        Ok(result == 1)
    }
}

/// RAII guard that releases its lock on drop (fire-and-forget — the release
/// happens on a spawned task since `Drop` can't be async).
pub struct LockGuard {
    lock: DistributedLock,
    key: String,
    value: String,
}

impl LockGuard {
    pub async fn new(lock: DistributedLock, key: String, ttl_seconds: u64) -> Result<Self> {
        let value = lock
            .acquire(&key, ttl_seconds)
            .await?
            .ok_or_else(|| Error::Internal(format!("failed to acquire lock: {key}")))?;

        Ok(Self { lock, key, value })
    }

    pub async fn extend(&self, ttl_seconds: u64) -> Result<bool> {
        self.lock.extend(&self.key, &self.value, ttl_seconds).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let lock = self.lock.clone();
        let key = self.key.clone();
        let value = self.value.clone();

        tokio::spawn(async move {
            if let Err(e) = lock.release(&key, &value).await {
                tracing::error!(key = %key, error = %e, "failed to release lock in drop");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_lock() -> DistributedLock {
        let client = redis::Client::open("redis://localhost:6379").unwrap();
        let conn = RedisConnectionManager::new(client).await.unwrap();
        DistributedLock::new(conn)
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn acquire_and_release_round_trips() {
        let lock = test_lock().await;

        let value = lock.acquire("test:lock1", 10).await.unwrap().unwrap();
        assert!(lock.acquire("test:lock1", 10).await.unwrap().is_none());

        assert!(lock.release("test:lock1", &value).await.unwrap());
        assert!(lock.acquire("test:lock1", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn with_lock_releases_after_operation() {
        let lock = test_lock().await;

        let result = lock
            .with_lock("test:lock2", 10, || async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(result, 42);

        assert!(lock.acquire("test:lock2", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn try_with_lock_skips_when_already_held() {
        let lock = test_lock().await;
        let held = lock.acquire("test:lock3", 10).await.unwrap().unwrap();

        let result = lock
            .try_with_lock("test:lock3", 10, || async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert!(result.is_none());

        lock.release("test:lock3", &held).await.unwrap();
        let result = lock
            .try_with_lock("test:lock3", 10, || async { Ok::<_, Error>(42) })
            .await
            .unwrap();
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn lock_guard_releases_on_drop() {
        let lock = test_lock().await;

        {
            let _guard = LockGuard::new(lock.clone(), "test:lock4".to_string(), 10)
                .await
                .unwrap();
            assert!(lock.acquire("test:lock4", 10).await.unwrap().is_none());
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert!(lock.acquire("test:lock4", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn extend_refreshes_ttl() {
        let lock = test_lock().await;
        let value = lock.acquire("test:lock5", 2).await.unwrap().unwrap();

        assert!(lock.extend("test:lock5", &value, 10).await.unwrap());

        tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;
        assert!(lock.acquire("test:lock5", 10).await.unwrap().is_none());
    }
}
