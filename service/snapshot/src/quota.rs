use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use domain_snapshot::{
    model::{
        entity::Account,
        vo::{Admission, EventKind},
    },
    service::{QuotaAdmissionService, StorageBackend},
};
use typed_builder::TypedBuilder;

use crate::EventRecorder;

/// Compares workspace plus history usage against the account's limit.
///
/// Usage is recomputed from the backend on every call, never cached.
#[derive(TypedBuilder)]
pub struct QuotaAdmissionServiceImpl {
    backend: Arc<dyn StorageBackend>,
    events: EventRecorder,
}

fn describe(admission: &Admission) -> String {
    match (admission.usage_bytes, admission.limit_bytes) {
        (Some(usage), Some(limit)) if limit > 0 => format!(
            "usage {usage} of {limit} bytes ({:.1}%)",
            usage as f64 * 100.0 / limit as f64
        ),
        (Some(usage), Some(limit)) => format!("usage {usage} of {limit} bytes"),
        _ => "no quota configured".to_owned(),
    }
}

#[async_trait]
impl QuotaAdmissionService for QuotaAdmissionServiceImpl {
    async fn admit(&self, account: &Account) -> anyhow::Result<Admission> {
        let admission = match account.quota_bytes {
            None => Admission::unlimited(),
            Some(limit) => {
                let workspace = self
                    .backend
                    .usage_bytes(&account.workspace)
                    .await
                    .with_context(|| format!("usage of {:?}", account.workspace))?;
                let history = self
                    .backend
                    .usage_bytes(&account.history)
                    .await
                    .with_context(|| format!("usage of {:?}", account.history))?;
                Admission::evaluate(workspace.saturating_add(history), limit)
            }
        };
        self.events
            .record(
                &account.name,
                EventKind::Admission {
                    verdict: admission.verdict,
                    usage_bytes: admission.usage_bytes,
                    limit_bytes: admission.limit_bytes,
                    reason: describe(&admission),
                },
            )
            .await;
        Ok(admission)
    }
}
