use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::{SyncConfig, SyncRequest, SyncService};

/// Periodic sync for the configured owners, followed by an enrichment pass when
/// `auto_enrich` is set and quality falls short. `None` when disabled or when
/// there is nobody to sync.
pub async fn maybe_build_scheduler(
    service: Arc<SyncService>,
    config: &SyncConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    if config.scheduled_owners.is_empty() {
        warn!("scheduler enabled but WEBREC_SCHEDULED_OWNERS is empty");
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let owners = Arc::new(config.scheduled_owners.clone());
    let auto_enrich = config.auto_enrich;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let service = service.clone();
        let owners = owners.clone();
        Box::pin(async move {
            for owner_id in owners.iter() {
                match service.trigger(SyncRequest::for_owner(owner_id.clone())).await {
                    Ok(response) => {
                        info!(
                            owner_id = %owner_id,
                            status = response.status.as_str(),
                            upserts = response.summary.successful_upserts,
                            "scheduled sync finished"
                        );
                        let wants_enrichment = response
                            .quality
                            .as_ref()
                            .is_some_and(|q| q.recommends_enrichment);
                        if auto_enrich && wants_enrichment {
                            if let Err(err) = service.run_enrichment_pass(owner_id).await {
                                warn!(
                                    owner_id = %owner_id,
                                    error = %err,
                                    "scheduled enrichment failed"
                                );
                            }
                        }
                    }
                    Err(err) => warn!(owner_id = %owner_id, error = %err, "scheduled sync failed"),
                }
            }
            service.diagnostics().take();
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/sample-account/bundle.json");
        let config = SyncConfig::default();
        let service = crate::build_fixture_service(&path, "owner-1", &config).unwrap();
        let built = maybe_build_scheduler(Arc::new(service), &config).await.unwrap();
        assert!(built.is_none());

        let no_owners = SyncConfig {
            scheduler_enabled: true,
            ..SyncConfig::default()
        };
        let service = crate::build_fixture_service(&path, "owner-1", &no_owners).unwrap();
        assert!(maybe_build_scheduler(Arc::new(service), &no_owners).await.unwrap().is_none());
    }
}
