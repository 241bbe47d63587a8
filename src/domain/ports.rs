use crate::domain::check_bundle::{Broker, CheckBundle, CheckBundleMetrics, CheckBundleQuery};
use crate::domain::errors::ApiError;
use async_trait::async_trait;

/// The slice of the check-management API the trap resolver relies on.
///
/// Implementations must validate CIDs locally and report a malformed one as
/// `ApiError::InvalidCid` before any request is made, and map a missing
/// resource to `ApiError::NotFound`.
#[async_trait]
pub trait CheckApi: Send + Sync {
    async fn fetch_check_bundle(&self, cid: &str) -> Result<CheckBundle, ApiError>;
    async fn search_check_bundles(
        &self,
        query: &CheckBundleQuery,
    ) -> Result<Vec<CheckBundle>, ApiError>;
    async fn create_check_bundle(&self, bundle: &CheckBundle) -> Result<CheckBundle, ApiError>;
    async fn fetch_brokers(&self) -> Result<Vec<Broker>, ApiError>;
    async fn fetch_check_bundle_metrics(&self, cid: &str) -> Result<CheckBundleMetrics, ApiError>;
    async fn update_check_bundle_metrics(
        &self,
        metrics: &CheckBundleMetrics,
    ) -> Result<CheckBundleMetrics, ApiError>;
}
