use log::trace;
use redis::{FromRedisValue, ToRedisArgs};

use super::{require_keys, tolerate_failures, ClusterConnection};
use crate::errors::ClusterResult;
use crate::node::ClusterNode;
use crate::resources::NodeResourceProvider;
use crate::routing::is_same_slot;

impl<P: NodeResourceProvider> ClusterConnection<P> {
    /// Get the value of a key.
    pub fn get<K: AsRef<[u8]>, RV: FromRedisValue>(&self, key: K) -> ClusterResult<RV> {
        let key = key.as_ref();
        self.execute_on_key(key, |connection| {
            redis::cmd("GET").arg(key).query(connection)
        })
    }

    /// Set the string value of a key.
    pub fn set<K: AsRef<[u8]>, V: ToRedisArgs>(&self, key: K, value: V) -> ClusterResult<()> {
        let key = key.as_ref();
        self.execute_on_key(key, |connection| {
            redis::cmd("SET").arg(key).arg(&value).query(connection)
        })
    }

    /// Counts how many of `keys` exist.
    ///
    /// Keys sharing a slot are checked with one `EXISTS`. Otherwise every key
    /// is checked on its own master and nodes that fail are skipped.
    pub fn exists<K: AsRef<[u8]>>(&self, keys: &[K]) -> ClusterResult<u64> {
        self.count_per_key("EXISTS", keys, false)
    }

    /// Deletes `keys` and returns how many were removed.
    ///
    /// Keys spanning several slots are deleted one by one. Any key that could
    /// not be deleted fails the whole call, even if other keys are gone.
    pub fn del<K: AsRef<[u8]>>(&self, keys: &[K]) -> ClusterResult<u64> {
        self.count_per_key("DEL", keys, true)
    }

    fn count_per_key<K: AsRef<[u8]>>(
        &self,
        command: &'static str,
        keys: &[K],
        strict: bool,
    ) -> ClusterResult<u64> {
        require_keys(keys)?;
        if is_same_slot(keys) {
            return self.execute_on_same_slot(keys, |connection| {
                let mut cmd = redis::cmd(command);
                for key in keys {
                    cmd.arg(key.as_ref());
                }
                cmd.query(connection)
            });
        }
        trace!("{command} spans several slots, running it per key");
        let result = self.executor().execute_multi_key_command(
            move |connection: &mut P::Connection, key: &[u8]| {
                redis::cmd(command).arg(key).query::<u64>(connection)
            },
            keys,
        )?;
        let counts = if strict {
            result.results_as_list()?
        } else {
            tolerate_failures(result, command)?
        };
        Ok(counts.into_iter().sum())
    }

    /// Get the values of all `keys`, in the order of `keys`.
    ///
    /// Keys spanning several slots are fetched one by one and any failing
    /// key fails the whole call.
    pub fn mget<K, RV>(&self, keys: &[K]) -> ClusterResult<Vec<RV>>
    where
        K: AsRef<[u8]>,
        RV: FromRedisValue + Send + 'static,
    {
        require_keys(keys)?;
        if is_same_slot(keys) {
            return self.execute_on_same_slot(keys, |connection| {
                let mut cmd = redis::cmd("MGET");
                for key in keys {
                    cmd.arg(key.as_ref());
                }
                cmd.query(connection)
            });
        }
        self.executor()
            .execute_multi_key_command(
                |connection: &mut P::Connection, key: &[u8]| {
                    redis::cmd("GET").arg(key).query::<RV>(connection)
                },
                keys,
            )?
            .results_in_key_order()
    }

    /// Finds all keys matching `pattern` on every master.
    ///
    /// Masters that cannot be reached are skipped.
    pub fn keys<RV: FromRedisValue + Send + 'static>(&self, pattern: &str) -> ClusterResult<Vec<RV>> {
        let pattern = pattern.to_string();
        let result = self.executor().execute_command_on_all_nodes(move |connection| {
            redis::cmd("KEYS").arg(&pattern).query::<Vec<RV>>(connection)
        })?;
        Ok(tolerate_failures(result, "KEYS")?.into_iter().flatten().collect())
    }

    /// Finds all keys matching `pattern` on `node`.
    pub fn keys_on<RV: FromRedisValue>(&self, node: &ClusterNode, pattern: &str) -> ClusterResult<Vec<RV>> {
        self.execute_on_node(node, |connection| {
            redis::cmd("KEYS").arg(pattern).query(connection)
        })
    }

    /// Returns a random key from any master, `None` if no master holds keys.
    ///
    /// Unreachable masters are skipped, but if none answered the call fails.
    pub fn random_key<RV: FromRedisValue + Send + 'static>(&self) -> ClusterResult<Option<RV>> {
        let result = self.executor().execute_command_on_all_nodes(|connection| {
            redis::cmd("RANDOMKEY").query::<Option<RV>>(connection)
        })?;
        Ok(tolerate_failures(result, "RANDOMKEY")?.into_iter().flatten().next())
    }

    /// Renames `key` to `new_key`. Both have to hash to the same slot.
    pub fn rename<K: AsRef<[u8]>>(&self, key: K, new_key: K) -> ClusterResult<()> {
        let (key, new_key) = (key.as_ref(), new_key.as_ref());
        self.execute_on_same_slot(&[key, new_key], |connection| {
            redis::cmd("RENAME").arg(key).arg(new_key).query(connection)
        })
    }

    /// Stores the union of the sorted sets `keys` in `destination`.
    pub fn zunionstore<K: AsRef<[u8]>>(&self, destination: K, keys: &[K]) -> ClusterResult<u64> {
        self.store_keys("ZUNIONSTORE", destination.as_ref(), keys, true)
    }

    /// Stores the intersection of the sorted sets `keys` in `destination`.
    pub fn zinterstore<K: AsRef<[u8]>>(&self, destination: K, keys: &[K]) -> ClusterResult<u64> {
        self.store_keys("ZINTERSTORE", destination.as_ref(), keys, true)
    }

    /// Stores the union of the sets `keys` in `destination`.
    pub fn sunionstore<K: AsRef<[u8]>>(&self, destination: K, keys: &[K]) -> ClusterResult<u64> {
        self.store_keys("SUNIONSTORE", destination.as_ref(), keys, false)
    }

    /// Stores the intersection of the sets `keys` in `destination`.
    pub fn sinterstore<K: AsRef<[u8]>>(&self, destination: K, keys: &[K]) -> ClusterResult<u64> {
        self.store_keys("SINTERSTORE", destination.as_ref(), keys, false)
    }

    fn store_keys<K: AsRef<[u8]>>(
        &self,
        command: &'static str,
        destination: &[u8],
        keys: &[K],
        with_numkeys: bool,
    ) -> ClusterResult<u64> {
        require_keys(keys)?;
        let mut all_keys = Vec::with_capacity(keys.len() + 1);
        all_keys.push(destination);
        all_keys.extend(keys.iter().map(AsRef::as_ref));
        self.execute_on_same_slot(&all_keys, |connection| {
            let mut cmd = redis::cmd(command);
            cmd.arg(destination);
            if with_numkeys {
                cmd.arg(keys.len());
            }
            for key in keys {
                cmd.arg(key.as_ref());
            }
            cmd.query(connection)
        })
    }

    /// Members of the first sorted set that are in none of the others.
    pub fn zdiff<K: AsRef<[u8]>, RV: FromRedisValue>(&self, keys: &[K]) -> ClusterResult<RV> {
        self.execute_on_same_slot(keys, |connection| {
            let mut cmd = redis::cmd("ZDIFF");
            cmd.arg(keys.len());
            for key in keys {
                cmd.arg(key.as_ref());
            }
            cmd.query(connection)
        })
    }

    /// Members of the first set that are in none of the others.
    pub fn sdiff<K: AsRef<[u8]>, RV: FromRedisValue>(&self, keys: &[K]) -> ClusterResult<RV> {
        self.execute_on_same_slot(keys, |connection| {
            let mut cmd = redis::cmd("SDIFF");
            for key in keys {
                cmd.arg(key.as_ref());
            }
            cmd.query(connection)
        })
    }
}
