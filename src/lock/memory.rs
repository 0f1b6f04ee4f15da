use super::{LockBackend, LockHandle};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Single-process lock table
#[derive(Default)]
pub struct InMemoryLockBackend {
    held: Arc<DashMap<String, Uuid>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockHandle>>> {
        match self.held.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let owner = Uuid::new_v4();
                slot.insert(owner);
                Ok(Some(Box::new(InMemoryLockHandle {
                    held: self.held.clone(),
                    key: key.to_string(),
                    owner,
                })))
            }
        }
    }
}

struct InMemoryLockHandle {
    held: Arc<DashMap<String, Uuid>>,
    key: String,
    owner: Uuid,
}

impl InMemoryLockHandle {
    fn unlock(&self) {
        self.held.remove_if(&self.key, |_, owner| *owner == self.owner);
    }
}

#[async_trait]
impl LockHandle for InMemoryLockHandle {
    async fn release(self: Box<Self>) -> Result<()> {
        self.unlock();
        Ok(())
    }
}

impl Drop for InMemoryLockHandle {
    fn drop(&mut self) {
        self.unlock();
    }
}
