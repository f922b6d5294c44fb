//! Consumer registry
//!
//! Process-wide map from `ConsumerId` to the handle of its running consumer.
//! Workers insert on consume and remove on close; the supervisor drains it on
//! shutdown. Every access goes through the methods below, which hold the lock
//! only for the map operation itself. Handles are closed by the caller after
//! the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::broker::command::Connection;
use crate::broker::consumer::{ConsumerHandle, ConsumerId};

#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<HashMap<ConsumerId, Arc<ConsumerHandle>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConsumerId, Arc<ConsumerHandle>>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle`, returning the consumer it displaced, if any.
    pub fn insert(&self, handle: ConsumerHandle) -> Option<Arc<ConsumerHandle>> {
        self.lock().insert(handle.id().clone(), Arc::new(handle))
    }

    pub fn remove(&self, id: &ConsumerId) -> Option<Arc<ConsumerHandle>> {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &ConsumerId) -> bool {
        self.lock().contains_key(id)
    }

    /// Remove and return every consumer started from `connection`.
    pub fn remove_by_connection(&self, connection: &Connection) -> Vec<Arc<ConsumerHandle>> {
        self.remove_where(|handle| handle.connection() == connection)
    }

    /// Remove and return consumers whose tailing loop already ended.
    pub fn remove_finished(&self) -> Vec<Arc<ConsumerHandle>> {
        self.remove_where(|handle| handle.is_finished())
    }

    /// Remove and return every registered consumer.
    pub fn drain(&self) -> Vec<Arc<ConsumerHandle>> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }

    pub fn ids(&self) -> Vec<ConsumerId> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove_where<F>(&self, mut predicate: F) -> Vec<Arc<ConsumerHandle>>
    where
        F: FnMut(&ConsumerHandle) -> bool,
    {
        let mut consumers = self.lock();
        let keys: Vec<ConsumerId> = consumers
            .iter()
            .filter(|(_, handle)| predicate(handle))
            .map(|(id, _)| id.clone())
            .collect();
        keys.into_iter()
            .filter_map(|id| consumers.remove(&id))
            .collect()
    }
}
