//! Sleep abstraction used between import job status checks.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Waits between status checks.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub type DynSleeper = Arc<dyn Sleeper>;

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeper lock poisoned").clone()
    }

    /// Sum of all requested sleeps.
    pub fn total(&self) -> Duration {
        self.sleeps
            .lock()
            .expect("sleeper lock poisoned")
            .iter()
            .sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .expect("sleeper lock poisoned")
            .push(duration);
    }
}
