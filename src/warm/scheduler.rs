use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::WarmBufferStore;
use crate::fetch::Fetcher;
use crate::state::EngineConfig;

/// Warmup cadence and shape.
#[derive(Debug, Clone)]
pub struct WarmupPlan {
    pub categories: Vec<String>,
    pub limit: usize,
    pub interval: Duration,
    pub settle: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub seed: Option<u64>,
}

impl WarmupPlan {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            categories: config.warmup_categories.clone(),
            limit: config.warmup_limit,
            interval: config.warmup_interval,
            settle: config.warmup_settle,
            batch_size: config.warmup_batch_size.max(1),
            batch_pause: config.warmup_batch_pause,
            seed: config.rng_seed,
        }
    }
}

/// Supervised background task that keeps warm buffers full.
pub struct WarmupScheduler {
    fetcher: Arc<Fetcher>,
    buffers: Arc<WarmBufferStore>,
    plan: WarmupPlan,
    task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl WarmupScheduler {
    pub fn new(fetcher: Arc<Fetcher>, buffers: Arc<WarmBufferStore>, plan: WarmupPlan) -> Self {
        Self {
            fetcher,
            buffers,
            plan,
            task: Mutex::new(None),
        }
    }

    /// Spawns the warmup loop. Returns false when a loop is already running.
    pub fn start(&self, sources: Vec<String>) -> bool {
        let Ok(mut task) = self.task.lock() else {
            return false;
        };
        if let Some((handle, _)) = task.as_ref() {
            if !handle.is_finished() {
                debug!("warmup already running");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.fetcher.clone(),
            self.buffers.clone(),
            self.plan.clone(),
            sources,
            cancel.clone(),
        ));
        *task = Some((handle, cancel));
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .ok()
            .and_then(|t| t.as_ref().map(|(handle, _)| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Cancels the loop and waits for it to exit. In-flight fetches are abandoned.
    pub async fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        let Some((handle, cancel)) = task else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(error = %e, "warmup task panicked");
            }
        }
        info!("warmup stopped");
    }
}

impl Drop for WarmupScheduler {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some((_, cancel)) = task.take() {
                cancel.cancel();
            }
        }
    }
}

/// Sleeps unless cancelled first. Returns true on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

async fn run(
    fetcher: Arc<Fetcher>,
    buffers: Arc<WarmBufferStore>,
    plan: WarmupPlan,
    mut sources: Vec<String>,
    cancel: CancellationToken,
) {
    info!(
        sources = sources.len(),
        categories = ?plan.categories,
        "warmup scheduler started"
    );
    if pause(plan.settle, &cancel).await {
        return;
    }

    let mut rng = match plan.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    loop {
        sources.shuffle(&mut rng);
        let started = Instant::now();

        for (i, batch) in sources.chunks(plan.batch_size.max(1)).enumerate() {
            if i > 0 && pause(plan.batch_pause, &cancel).await {
                return;
            }
            debug!(batch = i, size = batch.len(), "warming batch");
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(batch = i, "warmup cancelled mid-batch");
                    return;
                }
                _ = warm_batch(&fetcher, &buffers, &plan, batch) => {}
            }
        }

        info!(
            sources = sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warmup pass complete"
        );
        if pause(plan.interval, &cancel).await {
            return;
        }
    }
}

async fn warm_batch(
    fetcher: &Fetcher,
    buffers: &WarmBufferStore,
    plan: &WarmupPlan,
    batch: &[String],
) {
    let per_category = plan.categories.iter().map(|category| async move {
        let fetched = fetcher.fetch_concurrent(batch, category, plan.limit).await;
        for error in &fetched.errors {
            debug!(category, error = %error, "warmup source skipped");
        }
        for (source, items) in fetched.by_source {
            buffers.replace(&source, category, items, plan.limit);
        }
    });
    futures::future::join_all(per_category).await;
}
