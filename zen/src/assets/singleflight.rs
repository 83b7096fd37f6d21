//! Per-key call coalescing
//!
//! The first caller for a key becomes the leader and runs the work; later
//! callers for the same key wait on a watch channel for the leader's
//! outcome. If the leader is dropped before finishing, waiting followers
//! receive `Cancelled`.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Result, ZenError};

type Slot<T> = Option<Result<T>>;

/// Which part a caller played in a coalesced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the work
    Leader,
    /// Waited for the leader
    Follower,
}

/// Coalesces concurrent calls by key
#[derive(Debug)]
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, watch::Receiver<Slot<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

enum Ticket<T> {
    Lead(watch::Sender<Slot<T>>),
    Follow(watch::Receiver<Slot<T>>),
}

/// Removes the in-flight marker when the leader finishes or is dropped
struct FlightGuard<'a, T> {
    inflight: &'a Mutex<HashMap<String, watch::Receiver<Slot<T>>>>,
    key: &'a str,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.inflight.lock().remove(self.key);
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Empty coalescer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with work in progress
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Run `work` for `key` unless another caller already is
    ///
    /// Every caller observes the same result, success or failure.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Result<T>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ticket = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(rx) => Ticket::Follow(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), rx);
                    Ticket::Lead(tx)
                }
            }
        };

        match ticket {
            Ticket::Lead(tx) => {
                let guard = FlightGuard {
                    inflight: &self.inflight,
                    key,
                };
                let result = work().await;
                tx.send_replace(Some(result.clone()));
                drop(guard);
                (result, Role::Leader)
            }
            Ticket::Follow(mut rx) => {
                debug!(key, "waiting on in-flight fetch");
                (wait_for_leader(&mut rx, key).await, Role::Follower)
            }
        }
    }
}

async fn wait_for_leader<T: Clone>(rx: &mut watch::Receiver<Slot<T>>, key: &str) -> Result<T> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone().unwrap_or_else(|| {
                Err(ZenError::Cancelled(format!(
                    "in-flight fetch for {key} was abandoned"
                )))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("asset:demo", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("body".to_string())
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let (result, role) = handle.await.unwrap();
            assert_eq!(result.unwrap(), "body");
            if role == Role::Leader {
                leaders += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_reach_followers_and_are_not_remembered() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(ZenError::NetworkError("reset".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (follower, role) = flight.run("k", || async { Ok(1) }).await;
        assert_eq!(role, Role::Follower);
        assert!(follower.unwrap_err().is_network_class());
        assert!(leader.await.unwrap().0.is_err());

        // The failure is not cached: the next call runs fresh work.
        let (result, role) = flight.run("k", || async { Ok(2) }).await;
        assert_eq!((result.unwrap(), role), (2, Role::Leader));
    }

    #[tokio::test]
    async fn test_dropped_leader_cancels_followers() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("k", || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let (result, role) = follower.await.unwrap();
        assert_eq!(role, Role::Follower);
        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::Cancelled);
        assert_eq!(flight.in_flight(), 0);
    }
}
