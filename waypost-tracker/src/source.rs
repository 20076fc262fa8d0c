//! Single-shot location reads.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use waypost_core::{AcquireOptions, AcquisitionError, LocationProvider, LocationSample, Provenance};

/// Wraps the platform provider with a hard timeout and sample validation.
///
/// Reads are never retried here; the sampler tries again on its next tick.
pub struct SampleSource {
    provider: Arc<dyn LocationProvider>,
    options: AcquireOptions,
}

impl SampleSource {
    pub fn new(provider: Arc<dyn LocationProvider>) -> Self {
        Self {
            provider,
            options: AcquireOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AcquireOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &AcquireOptions {
        &self.options
    }

    pub async fn acquire(&self, entity_id: &str) -> Result<LocationSample, AcquisitionError> {
        self.acquire_with(entity_id, &self.options).await
    }

    /// Read once with caller-supplied options.
    pub async fn acquire_with(
        &self,
        entity_id: &str,
        options: &AcquireOptions,
    ) -> Result<LocationSample, AcquisitionError> {
        let fix = tokio::time::timeout(options.timeout, self.provider.current_fix(options))
            .await
            .map_err(|_| AcquisitionError::Timeout {
                elapsed: options.timeout,
            })??;

        let sample = LocationSample::new(entity_id, fix.lat, fix.lng, fix.accuracy, Utc::now())
            .with_provenance(Provenance::Live);
        sample.validate()?;
        debug!(entity_id = %entity_id, accuracy = fix.accuracy, "location acquired");
        Ok(sample)
    }
}
