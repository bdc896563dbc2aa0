use crate::backend::PageDriver;
use crate::config::schema::CaptureConfig;
use tracing::{debug, info, warn};
use verity_common::error::BackendError;
use verity_common::protocol::RawInteractionEvent;
use verity_scanner::{CAPTURE_DRAIN_JS, CAPTURE_JS, CAPTURE_STATUS_JS, CAPTURE_STOP_JS};

/// Instruments a page and turns buffered DOM records into ordered
/// `RawInteractionEvent`s.
pub struct CaptureSensor {
    config: CaptureConfig,
    next_sequence: u64,
    active: bool,
}

impl CaptureSensor {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            next_sequence: 1,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sequence number the next forwarded event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Install the capture script and wait for the page to confirm it.
    ///
    /// Calling this on an already-instrumented page only re-confirms.
    pub async fn start_capture(&mut self, driver: &mut dyn PageDriver) -> Result<(), BackendError> {
        if self.active && self.confirm(driver).await {
            debug!("Capture already active");
            return Ok(());
        }

        driver.evaluate(CAPTURE_JS).await?;

        let attempts = self.config.activation_attempts.max(1);
        for attempt in 1..=attempts {
            if self.confirm(driver).await {
                self.active = true;
                info!("Capture listeners active (attempt {}/{})", attempt, attempts);
                return Ok(());
            }
            debug!("Capture not confirmed yet (attempt {}/{})", attempt, attempts);
            tokio::time::sleep(std::time::Duration::from_millis(self.config.activation_retry_ms))
                .await;
        }

        self.active = false;
        Err(BackendError::Script(format!(
            "capture instrumentation not confirmed after {} attempts",
            attempts
        )))
    }

    async fn confirm(&self, driver: &mut dyn PageDriver) -> bool {
        match driver.evaluate(CAPTURE_STATUS_JS).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                debug!("Capture status check failed: {}", e);
                false
            }
        }
    }

    /// Remove all listeners. Errors are logged, never returned.
    pub async fn stop_capture(&mut self, driver: &mut dyn PageDriver) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = driver.evaluate(CAPTURE_STOP_JS).await {
            debug!("Capture stop script failed (page may be gone): {}", e);
        }
        info!("Capture stopped");
    }

    /// Read and clear the page buffer, returning events in arrival order.
    ///
    /// A page that lost its instrumentation (full navigation) is re-instrumented
    /// and yields no events for this tick.
    pub async fn drain(
        &mut self,
        driver: &mut dyn PageDriver,
    ) -> Result<Vec<RawInteractionEvent>, BackendError> {
        if !self.active {
            return Ok(Vec::new());
        }

        let value = driver.evaluate(CAPTURE_DRAIN_JS).await?;
        let records = match value {
            serde_json::Value::Array(records) => records,
            serde_json::Value::Null => {
                warn!("Capture instrumentation lost, re-installing");
                self.active = false;
                self.start_capture(driver).await?;
                return Ok(Vec::new());
            }
            other => {
                return Err(BackendError::Script(format!(
                    "unexpected capture buffer: {}",
                    other
                )));
            }
        };

        Ok(self.normalize(records))
    }

    fn normalize(&mut self, records: Vec<serde_json::Value>) -> Vec<RawInteractionEvent> {
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<RawInteractionEvent>(record) {
                Ok(mut event) => {
                    event.sequence = self.next_sequence;
                    self.next_sequence += 1;
                    events.push(event);
                }
                Err(e) => warn!("Skipping malformed capture record: {}", e),
            }
        }
        events
    }
}
