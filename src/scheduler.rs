use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::models::Subscription;
use crate::poller::{PollReport, Poller};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub subscription_id: String,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub uptime_seconds: u64,
}

/// One recurring poll job per active subscription.
///
/// Guarantees: single-flight per subscription (an overlapping trigger is
/// skipped, not queued), idempotent schedule/unschedule, and restart
/// recovery purely from persisted state.
pub struct PollScheduler {
    scheduler: JobScheduler,
    poller: Arc<Poller>,
    store: Arc<dyn Store>,
    jobs: Arc<RwLock<HashMap<String, JobInfo>>>, // subscription_id -> JobInfo
    running: Arc<Mutex<HashSet<String>>>,        // subscription ids with a poll in flight
    poll_interval: Duration,
    start_time: DateTime<Utc>,
}

impl PollScheduler {
    pub async fn new(
        poller: Arc<Poller>,
        store: Arc<dyn Store>,
        poll_interval: Duration,
    ) -> crate::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            poller,
            store,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashSet::new())),
            poll_interval,
            start_time: Utc::now(),
        })
    }

    pub async fn start(&mut self) -> crate::Result<()> {
        self.scheduler.start().await?;
        tracing::info!("poll scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> crate::Result<()> {
        self.scheduler.shutdown().await?;
        self.running.lock().await.clear();
        tracing::info!("poll scheduler shutdown");
        Ok(())
    }

    /// Reload every active subscription from the store and schedule it.
    /// Called once at process start; a missed interval simply means the next
    /// run catches up.
    pub async fn restore(&self) -> crate::Result<usize> {
        let subscriptions = self.store.list_active_subscriptions().await?;
        let mut restored = 0;

        for subscription in &subscriptions {
            if subscription.is_paused {
                continue;
            }
            self.schedule_subscription(subscription).await?;
            restored += 1;
        }

        tracing::info!(restored, "rescheduled subscriptions from persisted state");
        Ok(restored)
    }

    /// Schedule the recurring poll job for a subscription. Starting a job
    /// that already exists is a no-op.
    pub async fn schedule_subscription(&self, subscription: &Subscription) -> crate::Result<()> {
        if !subscription.is_active || subscription.is_paused {
            return Err(crate::AppError::Validation(format!(
                "cannot schedule inactive or paused subscription {}",
                subscription.id
            )));
        }

        {
            let jobs = self.jobs.read().await;
            if jobs.contains_key(&subscription.id) {
                tracing::debug!(
                    subscription_id = %subscription.id,
                    "job already scheduled, skipping"
                );
                return Ok(());
            }
        }

        let poller = Arc::clone(&self.poller);
        let jobs = Arc::clone(&self.jobs);
        let running = Arc::clone(&self.running);
        let subscription_id = subscription.id.clone();

        let job = Job::new_repeated_async(self.poll_interval, move |_uuid, _lock| {
            let poller = Arc::clone(&poller);
            let jobs = Arc::clone(&jobs);
            let running = Arc::clone(&running);
            let subscription_id = subscription_id.clone();

            Box::pin(async move {
                // Single-flight: skip, don't queue, when the previous run
                // has not finished
                {
                    let mut running = running.lock().await;
                    if !running.insert(subscription_id.clone()) {
                        tracing::debug!(
                            subscription_id = %subscription_id,
                            "previous poll still running, skipping trigger"
                        );
                        return;
                    }
                }

                let result = poller.poll_subscription(&subscription_id).await;
                Self::update_job_stats(&jobs, &subscription_id, &result).await;

                if let Err(err) = &result {
                    tracing::error!(subscription_id = %subscription_id, error = %err, "scheduled poll failed");
                }

                running.lock().await.remove(&subscription_id);
            })
        })?;

        let job_id = self.scheduler.add(job).await?;

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(
                subscription.id.clone(),
                JobInfo {
                    id: job_id,
                    subscription_id: subscription.id.clone(),
                    created_at: Utc::now(),
                    last_run: None,
                    run_count: 0,
                    success_count: 0,
                    error_count: 0,
                    last_error: None,
                },
            );
        }

        tracing::info!(
            subscription_id = %subscription.id,
            interval_seconds = self.poll_interval.as_secs(),
            "scheduled subscription"
        );
        Ok(())
    }

    /// Remove a subscription's job. Stopping a job that does not exist is a
    /// no-op.
    pub async fn unschedule_subscription(&self, subscription_id: &str) -> crate::Result<()> {
        let removed = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(subscription_id)
        };

        if let Some(job_info) = removed {
            self.scheduler.remove(&job_info.id).await?;
            tracing::info!(subscription_id, job_id = %job_info.id, "unscheduled subscription");
        }

        Ok(())
    }

    /// Run one out-of-band poll cycle immediately, reusing all the regular
    /// gating. Refused while a scheduled run is in flight.
    pub async fn run_now(&self, subscription_id: &str) -> crate::Result<PollReport> {
        {
            let mut running = self.running.lock().await;
            if !running.insert(subscription_id.to_string()) {
                return Err(crate::AppError::AlreadyRunning {
                    subscription_id: subscription_id.to_string(),
                });
            }
        }

        tracing::info!(subscription_id, "running immediate poll");
        let result = self.poller.poll_subscription(subscription_id).await;
        Self::update_job_stats(&self.jobs, subscription_id, &result).await;
        self.running.lock().await.remove(subscription_id);

        result
    }

    pub async fn is_running(&self, subscription_id: &str) -> bool {
        self.running.lock().await.contains(subscription_id)
    }

    pub async fn has_job(&self, subscription_id: &str) -> bool {
        self.jobs.read().await.contains_key(subscription_id)
    }

    pub async fn get_job_info(&self, subscription_id: &str) -> Option<JobInfo> {
        self.jobs.read().await.get(subscription_id).cloned()
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.jobs.read().await;
        let running = self.running.lock().await;

        let completed_runs: u64 = jobs.values().map(|j| j.success_count).sum();
        let failed_runs: u64 = jobs.values().map(|j| j.error_count).sum();
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_jobs: jobs.len(),
            running_jobs: running.len(),
            completed_runs,
            failed_runs,
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }

    async fn update_job_stats(
        jobs: &Arc<RwLock<HashMap<String, JobInfo>>>,
        subscription_id: &str,
        result: &crate::Result<PollReport>,
    ) {
        let mut jobs = jobs.write().await;
        if let Some(job_info) = jobs.get_mut(subscription_id) {
            job_info.last_run = Some(Utc::now());
            job_info.run_count += 1;

            match result {
                Ok(_) => {
                    job_info.success_count += 1;
                    job_info.last_error = None;
                }
                Err(err) => {
                    job_info.error_count += 1;
                    job_info.last_error = Some(err.to_string());
                }
            }
        }
    }
}
