use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use portline_core::domain::conversation::ConversationKey;

/// One async mutex per conversation key. Waiters are served in arrival order.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<ConversationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn acquire(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            // entries nobody holds or waits on are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use portline_core::domain::conversation::ConversationKey;

    use crate::locks::KeyLocks;

    #[tokio::test]
    async fn same_key_waits_and_other_keys_do_not() {
        let locks = Arc::new(KeyLocks::default());
        let held = locks.acquire(&ConversationKey::new("525511111111")).await;

        let other = locks.acquire(&ConversationKey::new("525522222222")).await;
        drop(other);

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(&ConversationKey::new("525511111111")).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.expect("waiter acquires after release");
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = KeyLocks::default();
        drop(locks.acquire(&ConversationKey::new("525511111111")).await);
        drop(locks.acquire(&ConversationKey::new("525522222222")).await);

        assert_eq!(locks.tracked(), 1);
    }
}
