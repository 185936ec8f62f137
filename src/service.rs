use async_trait::async_trait;

use crate::error::Result;

/// Lifecycle of a long-lived resource owner.
///
/// `start` acquires whatever the service holds and `stop` releases it; both
/// are idempotent so a cleanup path can call `stop` unconditionally.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}
