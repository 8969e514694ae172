//! # Background Task Module
//!
//! ## Purpose
//! Fire-and-forget submission of deferred work (cache population, durable
//! view writes) so the read path never blocks on a secondary write.
//!
//! ## Guarantee
//! Submitted work runs on the runtime after the caller has already produced
//! its response; failures are logged and never retried automatically.

use std::future::Future;

/// Submit a unit of work to run in the background.
///
/// The caller continues immediately. The task's error, if any, is logged
/// under the given name and dropped; nothing is retried.
pub fn spawn_detached<F>(name: &'static str, work: F)
where
    F: Future<Output = crate::errors::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = work.await {
            tracing::warn!(task = name, category = e.category(), "Background task failed: {}", e);
        }
    });
}
