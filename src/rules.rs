use tracing::{info, warn};

use crate::sources::{TwitterApi, TwitterError};

/// Keeps the server-side filter in sync with the configured rule.
pub struct RuleReconciler<'a, A: ?Sized> {
    api: &'a A,
}

/// What a reconciliation changed on the server.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RuleChanges {
    pub deleted: Vec<String>,
    pub added: bool,
}

impl<'a, A: TwitterApi + ?Sized> RuleReconciler<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Deletes (if `remove_stale`) every active rule other than `desired` and
    /// adds `desired` unless it is already active. Does no mutating call when
    /// nothing has to change.
    ///
    /// A rejected delete does not prevent the add; the first error is returned
    /// once both were tried.
    pub async fn reconcile(
        &self,
        desired: &str,
        remove_stale: bool,
    ) -> Result<RuleChanges, TwitterError> {
        let active = self.api.active_rules().await?;
        let mut changes = RuleChanges::default();
        let mut failure = None;

        if remove_stale {
            let (stale_ids, stale_values): (Vec<_>, Vec<_>) = active
                .iter()
                .filter(|r| r.value != desired)
                .map(|r| (r.id.clone(), r.value.as_str()))
                .unzip();

            if !stale_ids.is_empty() {
                info!(rules = ?stale_values, "deleting stale stream rules");
                match self.api.delete_rules(&stale_ids).await {
                    Ok(()) => changes.deleted = stale_ids,
                    Err(e) => {
                        warn!(error = %e, "could not delete stale stream rules");
                        failure = Some(e);
                    }
                }
            }
        }

        if !active.iter().any(|r| r.value == desired) {
            info!(rule = desired, "adding stream rule");
            match self.api.add_rule(desired).await {
                Ok(()) => changes.added = true,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        info!(rule = desired, "filtered stream rule in place");
        Ok(changes)
    }
}
