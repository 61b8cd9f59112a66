/// Due-work leaser and background loops
///
/// One logical leaser claims due posts each tick and fans them out to a
/// bounded worker pool; a watchdog returns expired leases to the schedulable
/// pool. Per-account order is kept by the keyed mutex registry.
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub mod fsm;
pub mod mutex;
pub mod worker;

use crate::{context::AppContext, error::SchedResult};

/// Background scheduler driving the publishing engine
pub struct Scheduler {
    context: Arc<AppContext>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { context, shutdown_tx }
    }

    /// Start the leaser and watchdog loops
    pub fn start(self: Arc<Self>) {
        info!("Starting publishing scheduler");

        tokio::spawn(Self::lease_loop(Arc::clone(&self), self.shutdown_tx.subscribe()));
        tokio::spawn(Self::watchdog_loop(Arc::clone(&self), self.shutdown_tx.subscribe()));

        info!("Scheduler loops started");
    }

    /// Stop the loops and refuse new publish work; in-flight workers finish
    /// their current external call and observe the closed pool after it
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.context.publish_permits.close();
    }

    /// Lease due posts every tick and dispatch them to workers
    async fn lease_loop(scheduler: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let tick = scheduler.context.config.scheduling.tick_interval_secs;
        let mut interval = interval(Duration::from_secs(tick.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    info!("Lease loop stopping");
                    return;
                }
            }

            match run_tick(&scheduler.context).await {
                Ok(leased) => {
                    if leased > 0 {
                        info!("Leased {} due post(s)", leased);
                    }
                }
                Err(e) => error!("Lease tick failed: {}", e),
            }
        }
    }

    /// Reclaim leases whose workers died
    async fn watchdog_loop(scheduler: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let ctx = &scheduler.context;
        let tick = ctx.config.scheduling.tick_interval_secs;
        let mut interval = interval(Duration::from_secs(tick.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    info!("Lease watchdog stopping");
                    return;
                }
            }

            let now = ctx.clock.now();
            let ttl = chrono::Duration::seconds(ctx.config.scheduling.lease_ttl_secs);
            match ctx.posts.reap_expired_leases(now, ttl).await {
                Ok(0) => {}
                Ok(reaped) => info!("Reaped {} expired lease(s)", reaped),
                Err(e) => error!("Lease watchdog failed: {}", e),
            }
        }
    }
}

/// One leaser tick: claim due work and hand it to the worker pool.
/// Also the backing of the on-demand publish endpoint.
pub async fn run_tick(ctx: &AppContext) -> SchedResult<usize> {
    let now = ctx.clock.now();
    let grace = chrono::Duration::seconds(ctx.config.scheduling.grace_secs);
    let batch = ctx.config.scheduling.batch_size;

    let ids = ctx.posts.lease_due(now, grace, batch).await?;
    let leased = ids.len();

    for post_id in ids {
        dispatch(ctx.clone(), post_id);
    }

    Ok(leased)
}

/// Run one post through the publish pipeline on the bounded pool,
/// serialized per account
fn dispatch(ctx: AppContext, post_id: i64) {
    tokio::spawn(async move {
        let _permit = match Arc::clone(&ctx.publish_permits).acquire_owned().await {
            Ok(permit) => permit,
            // Pool closed on shutdown; the lease expires and the watchdog
            // reschedules the post
            Err(_) => return,
        };

        let account_id = match ctx.posts.get(post_id).await {
            Ok(post) => post.account_id,
            Err(e) => {
                error!(post_id, "leased post vanished: {}", e);
                return;
            }
        };

        let account_lock = ctx.locks.for_account(account_id);
        let _serial = account_lock.lock().await;

        match worker::publish_one(&ctx, post_id).await {
            Ok(outcome) => debug!(post_id, ?outcome, "publish attempt settled"),
            Err(e) => error!(post_id, "publish attempt errored: {}", e),
        }
    });
}
