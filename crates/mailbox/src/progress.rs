use uuid::Uuid;

/// Child-run progress lookup injected into `waitForMessages` so this crate
/// never has to depend on the orchestrator that owns the run tree. The
/// kernel supplies the real implementation (`queryRuns` scoped to a
/// parent); tests and standalone callers can pass `None`.
#[async_trait::async_trait]
pub trait ChildProgressQuery: Send + Sync {
    async fn child_progress(&self, parent_run_id: Uuid) -> Vec<serde_json::Value>;
}

pub struct NullChildProgressQuery;

#[async_trait::async_trait]
impl ChildProgressQuery for NullChildProgressQuery {
    async fn child_progress(&self, _parent_run_id: Uuid) -> Vec<serde_json::Value> {
        Vec::new()
    }
}
