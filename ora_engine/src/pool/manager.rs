use super::{ConnectionPool, PoolOptions};
use crate::engine::connection_info::{ConnectionInfo, PoolKey};
use crate::error::{OraError, Result};
use crate::native::NativeDriver;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Registry {
    pools: HashMap<PoolKey, Arc<ConnectionPool>>,
    shut_down: bool,
}

/// Registry of connection pools keyed by [`PoolKey`].
///
/// Owned by an [`crate::OraEnvironment`] and shared by every connection it
/// creates. Pools live until [`ConnectionPoolManager::shutdown`].
pub struct ConnectionPoolManager {
    driver: Arc<dyn NativeDriver>,
    options: PoolOptions,
    registry: Mutex<Registry>,
}

impl ConnectionPoolManager {
    pub fn new(driver: Arc<dyn NativeDriver>, options: PoolOptions) -> Self {
        Self {
            driver,
            options,
            registry: Mutex::new(Registry {
                pools: HashMap::new(),
                shut_down: false,
            }),
        }
    }

    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| OraError::InternalError("Failed to lock pool registry".to_string()))
    }

    /// Returns the pool for `info`'s fingerprint, creating it on first use.
    ///
    /// A new pool warms up without the registry lock held. When two callers
    /// race to create the same pool, the first one registered wins and the
    /// other is disposed, so every caller observes the same pool.
    pub fn get_pool(&self, info: &ConnectionInfo) -> Result<Arc<ConnectionPool>> {
        let key = info.pool_key();
        {
            let registry = self.lock_registry()?;
            if registry.shut_down {
                return Err(OraError::PoolDisposed);
            }
            if let Some(pool) = registry.pools.get(&key) {
                return Ok(Arc::clone(pool));
            }
        }

        let created = Arc::new(ConnectionPool::new(
            Arc::clone(&self.driver),
            info,
            &self.options,
        )?);
        let mut registry = self.lock_registry()?;
        let winner = if registry.shut_down {
            None
        } else {
            match registry.pools.entry(key) {
                Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&created));
                    return Ok(created);
                }
            }
        };
        drop(registry);

        created.dispose();
        match winner {
            Some(pool) => {
                log::debug!("Discarded duplicate pool {:?}", pool.key());
                Ok(pool)
            }
            None => Err(OraError::PoolDisposed),
        }
    }

    pub fn pool_count(&self) -> usize {
        self.lock_registry().map(|r| r.pools.len()).unwrap_or(0)
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn driver(&self) -> Arc<dyn NativeDriver> {
        Arc::clone(&self.driver)
    }

    /// Disposes every pool. Later `get_pool` calls fail with
    /// [`OraError::PoolDisposed`].
    pub fn shutdown(&self) {
        let pools: Vec<Arc<ConnectionPool>> = match self.registry.lock() {
            Ok(mut registry) => {
                registry.shut_down = true;
                registry.pools.drain().map(|(_, pool)| pool).collect()
            }
            Err(poisoned) => {
                let mut registry = poisoned.into_inner();
                registry.shut_down = true;
                registry.pools.drain().map(|(_, pool)| pool).collect()
            }
        };
        log::info!("Shutting down {} connection pool(s)", pools.len());
        for pool in pools {
            pool.dispose();
        }
    }
}

impl Drop for ConnectionPoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
