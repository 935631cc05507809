//! One-shot pipeline shutdown latch.

use std::sync::Arc;

use tokio::sync::watch;

/// Single-shot latch that cascades pipeline termination.
///
/// Cloned into every segment of a pipeline at wiring time as the capability
/// behind `shutdown_parent_pipeline`. Triggering is idempotent and safe from
/// any number of tasks; observers that subscribe after the latch fired see
/// the fired state immediately.
#[derive(Clone)]
pub struct ShutdownLatch {
    fired: Arc<watch::Sender<bool>>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            fired: Arc::new(fired),
        }
    }

    pub fn trigger(&self) {
        self.fired.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolve once the latch has fired. Resolves immediately if it already
    /// has.
    pub async fn triggered(&self) {
        let mut rx = self.fired.subscribe();
        // wait_for only fails when the sender is dropped, which cannot
        // happen while `self` holds it.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn fires_once_for_all_observers() {
        let latch = ShutdownLatch::new();
        assert!(!latch.is_triggered());

        let early = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.triggered().await })
        };

        latch.trigger();
        latch.trigger();
        assert!(latch.is_triggered());

        timeout(Duration::from_secs(1), early)
            .await
            .expect("early observer must unblock")
            .expect("observer task");

        // Late observers resolve immediately.
        timeout(Duration::from_secs(1), latch.triggered())
            .await
            .expect("late observer must not block");
    }
}
