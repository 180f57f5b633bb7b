use std::error::Error;

use tracing::error;

/// Sink for failures that are swallowed so a sync can carry on.
pub trait Reporter: Send + Sync {
    fn report(&self, linked_account_id: &str, err: &(dyn Error + 'static));
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, linked_account_id: &str, err: &(dyn Error + 'static)) {
        error!(%linked_account_id, error = %err, "account sync step failed");
    }
}
