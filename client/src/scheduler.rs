use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A repeating job with explicit start and stop
///
/// The job is awaited inside the loop, so two invocations never overlap. A
/// run that overshoots its period skips the missed ticks instead of bursting.
pub struct PeriodicTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: None,
            stop: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| !handle.is_finished())
    }

    pub fn start<F, Fut>(&mut self, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            warn!("Task {} already running", self.name);
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period.max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Task {} stopped", name);
        });

        debug!("Task {} started every {:?}", self.name, period);
        self.handle = Some(handle);
        self.stop = Some(stop_tx);
    }

    /// Signals the loop and waits for any in-flight run to finish
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Task {} ended abnormally: {}", self.name, e);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_repeatedly_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut task = PeriodicTask::new("counter");

        let counter = runs.clone();
        task.start(Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop().await;
        assert!(!task.is_running());

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_slow_job_never_overlaps() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut task = PeriodicTask::new("slow");

        let (active_job, peak_job) = (active.clone(), peak.clone());
        task.start(Duration::from_millis(5), move || {
            let active = active_job.clone();
            let peak = peak_job.clone();
            async move {
                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_active, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        task.stop().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut task = PeriodicTask::new("once");

        for _ in 0..2 {
            let counter = runs.clone();
            task.start(Duration::from_secs(60), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;
        // Only the first tick of a single loop fires within the window.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_period_does_not_kill_the_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut task = PeriodicTask::new("zero");

        let counter = runs.clone();
        task.start(Duration::ZERO, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(task.is_running());
        task.stop().await;
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
