//! The concurrency governor.
//!
//! A two-mode admission gate over the published repository tree.
//! Downloads take shared read permits, bounded by a semaphore so a
//! flood of slow clients cannot exhaust file handles; the serializer
//! task takes the exclusive write permit for the whole
//! merge-publish-materialize sequence. Guards are owned so a download
//! can carry its permit across response streaming.

use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, OwnedSemaphorePermit};

/// Shared/exclusive admission gate with a cap on concurrent readers.
#[derive(Clone)]
pub struct Governor {
    lock: Arc<tokio::sync::RwLock<()>>,
    readers: Arc<tokio::sync::Semaphore>,
}

/// Held by each admitted reader.
pub struct ReadGuard {
    _permit: OwnedSemaphorePermit,
    _lock: OwnedRwLockReadGuard<()>,
}

/// Held by the single writer.
pub struct WriteGuard {
    _lock: OwnedRwLockWriteGuard<()>,
}

impl Governor {
    pub fn new(max_readers: usize) -> Self {
        Self {
            lock: Arc::new(tokio::sync::RwLock::new(())),
            readers: Arc::new(tokio::sync::Semaphore::new(max_readers)),
        }
    }

    /// Acquire a shared read permit. Blocks while a writer holds the
    /// gate or while `max_readers` readers are already admitted.
    pub async fn read(&self) -> ReadGuard {
        // The semaphore is owned by the governor and never closed.
        let permit = self
            .readers
            .clone()
            .acquire_owned()
            .await
            .expect("governor semaphore closed");
        let lock = self.lock.clone().read_owned().await;
        ReadGuard {
            _permit: permit,
            _lock: lock,
        }
    }

    /// Acquire the exclusive write permit. Blocks until all admitted
    /// readers have released.
    pub async fn write(&self) -> WriteGuard {
        WriteGuard {
            _lock: self.lock.clone().write_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_readers_share_writers_exclude() {
        let governor = Governor::new(8);

        let r1 = governor.read().await;
        let r2 = governor.read().await;

        // A writer cannot get in while readers hold permits.
        let g = governor.clone();
        let writer = tokio::spawn(async move {
            let _w = g.write().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(r1);
        drop(r2);
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reader_cap_blocks_excess_readers() {
        let governor = Governor::new(2);
        let admitted = Arc::new(AtomicUsize::new(0));

        let _r1 = governor.read().await;
        let _r2 = governor.read().await;

        let g = governor.clone();
        let count = admitted.clone();
        let third = tokio::spawn(async move {
            let _r = g.read().await;
            count.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 0);

        drop(_r1);
        tokio::time::timeout(Duration::from_secs(1), third)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_writer_blocks_new_readers() {
        let governor = Governor::new(8);
        let w = governor.write().await;

        let g = governor.clone();
        let reader = tokio::spawn(async move {
            let _r = g.read().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        drop(w);
        tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
    }
}
