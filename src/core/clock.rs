use log::info;
use tokio::sync::Mutex;

/// Scalar Lamport clock shared by the server and the client operations.
///
/// `tick` runs before every send, `merge` on every receive. Both go through
/// the same lock so local events are totally ordered.
#[derive(Debug, Default)]
pub struct LogicalClock {
    value: Mutex<u64>,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(value: u64) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub async fn tick(&self) -> u64 {
        let mut value = self.value.lock().await;
        *value = value.saturating_add(1);
        info!("=> Updating clock to {}", *value);
        *value
    }

    pub async fn merge(&self, received: u64) -> u64 {
        let mut value = self.value.lock().await;
        *value = (*value).max(received).saturating_add(1);
        info!("=> Updating clock to {}", *value);
        *value
    }

    pub async fn value(&self) -> u64 {
        *self.value.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tick_increments_by_one() {
        let clock = LogicalClock::new();
        assert_eq!(clock.tick().await, 1);
        assert_eq!(clock.tick().await, 2);
        assert_eq!(clock.value().await, 2);
    }

    #[tokio::test]
    async fn test_merge_takes_max_plus_one() {
        let clock = LogicalClock::starting_at(3);
        assert_eq!(clock.merge(10).await, 11);
        // An older remote clock still advances the local one.
        assert_eq!(clock.merge(2).await, 12);
    }

    #[tokio::test]
    async fn test_values_strictly_increase() {
        let clock = LogicalClock::new();
        let mut highest = 0;
        for received in [0, 7, 3, 7, 20, 1, 0] {
            let ticked = clock.tick().await;
            assert!(ticked > highest);
            highest = highest.max(ticked);

            let merged = clock.merge(received).await;
            assert!(merged > highest);
            assert!(merged > received);
            highest = merged;
        }
    }

    #[tokio::test]
    async fn test_saturates_instead_of_overflowing() {
        let clock = LogicalClock::new();
        assert_eq!(clock.merge(u64::MAX).await, u64::MAX);
        assert_eq!(clock.tick().await, u64::MAX);
    }

    #[tokio::test]
    async fn test_concurrent_ticks_are_unique() {
        let clock = Arc::new(LogicalClock::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let clock = clock.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    seen.push(clock.tick().await);
                }
                seen
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for value in handle.await.unwrap() {
                assert!(all.insert(value), "duplicate clock value {}", value);
            }
        }
        assert_eq!(all.len(), 400);
        assert_eq!(clock.value().await, 400);
    }
}
