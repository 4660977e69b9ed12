//! Background removal of expired windows.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::limiter::RateLimiter;
use crate::error::{GatekeeperError, Result};

/// Handle to a running sweep task.
///
/// The task sweeps each limiter once per interval, independent of request
/// traffic. Call [`Sweeper::stop`] for an orderly shutdown; dropping the
/// handle aborts the task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a sweep task on the current tokio runtime.
    ///
    /// The first sweep runs one full `interval` after spawning.
    pub fn spawn(limiters: Vec<RateLimiter>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(GatekeeperError::Config(
                "sweep interval must be positive".to_string(),
            ));
        }

        // Both the first deadline and the one after it must be representable.
        let start = tokio::time::Instant::now()
            .checked_add(interval)
            .filter(|start| start.checked_add(interval).is_some())
            .ok_or_else(|| {
                GatekeeperError::Config(format!(
                    "sweep interval of {}s is too large",
                    interval.as_secs()
                ))
            })?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(
            limiters = limiters.len(),
            interval_secs = interval.as_secs_f64(),
            "Starting window sweeper"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        for limiter in &limiters {
                            let removed = limiter.sweep_expired();
                            debug!(
                                limiter = %limiter.name(),
                                removed,
                                remaining = limiter.tracked_keys(),
                                "Swept expired windows"
                            );
                        }
                    }
                }
            }

            info!("Window sweeper stopped");
        });

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Window sweeper task failed");
            }
        }
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::LimitConfig;
    use std::sync::Arc;

    fn limiter(clock: &ManualClock) -> RateLimiter {
        RateLimiter::builder("test", LimitConfig::new(5, Duration::from_secs(10)))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let clock = ManualClock::new(0);
        let err = Sweeper::spawn(vec![limiter(&clock)], Duration::ZERO).unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[tokio::test]
    async fn test_oversized_interval_rejected() {
        let clock = ManualClock::new(0);
        let err = Sweeper::spawn(vec![limiter(&clock)], Duration::from_secs(u64::MAX)).unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        limiter.is_allowed("a");
        limiter.is_allowed("b");

        let sweeper = Sweeper::spawn(vec![limiter.clone()], Duration::from_secs(300)).unwrap();

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(limiter.tracked_keys(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_windows_survive_sweep() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        limiter.is_allowed("a");

        let sweeper = Sweeper::spawn(vec![limiter.clone()], Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(limiter.tracked_keys(), 1);
        sweeper.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let clock = ManualClock::new(0);
        let sweeper = Sweeper::spawn(vec![limiter(&clock)], Duration::from_secs(60)).unwrap();
        assert!(sweeper.is_running());

        tokio::time::timeout(Duration::from_secs(5), sweeper.stop())
            .await
            .expect("sweeper should stop promptly");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sweeper_stops_sweeping() {
        let clock = ManualClock::new(0);
        let limiter = limiter(&clock);
        limiter.is_allowed("a");

        let sweeper = Sweeper::spawn(vec![limiter.clone()], Duration::from_secs(1)).unwrap();
        drop(sweeper);

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(limiter.tracked_keys(), 1);
    }
}
