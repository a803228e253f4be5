//! Interval workers for the scheduled sweeps. Each tick calls the same
//! `JobService::run` the admin trigger uses.

use chrono::Utc;
use std::sync::Arc;
use tokio::{task::JoinHandle, time};

use crate::{
    config::JobsConfig,
    service::{Job, ServiceContext},
};

fn interval_for(job: Job, config: &JobsConfig) -> u64 {
    match job {
        Job::AutoApprove => config.auto_approve_interval_secs,
        Job::ExpiredTrials => config.expired_trial_interval_secs,
        Job::CreditDrop => config.credit_drop_interval_secs,
        Job::AdExpiry => config.ad_expiry_interval_secs,
    }
}

pub fn spawn_all(context: Arc<ServiceContext>, config: &JobsConfig) -> Vec<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("Scheduled jobs disabled");
        return Vec::new();
    }

    Job::ALL
        .into_iter()
        .filter_map(|job| {
            let secs = interval_for(job, config);
            if secs == 0 {
                tracing::info!(job = job.as_str(), "Job disabled by zero interval");
                return None;
            }
            Some(spawn(context.clone(), job, time::Duration::from_secs(secs)))
        })
        .collect()
}

pub fn spawn(context: Arc<ServiceContext>, job: Job, every: time::Duration) -> JoinHandle<()> {
    tracing::info!(job = job.as_str(), interval_secs = every.as_secs(), "Scheduling job");

    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(err) = context.job_service.run(job, Utc::now()).await {
                tracing::warn!(job = job.as_str(), "Scheduled job failed: {}", err);
            }
        }
    })
}
