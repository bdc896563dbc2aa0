pub mod bus;
pub mod comparator;

pub use bus::{Delivery, Subscription, SubscriptionBus};
pub use comparator::Comparator;

use crate::config::schema::VerifierConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use verity_common::protocol::{ComparisonResult, ExpectedAction};

/// Deadline used when the requested timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Awaits a user's next verified action and scores it.
pub struct ActionVerifier {
    bus: Arc<SubscriptionBus>,
    comparator: Comparator,
    poll_slice: Duration,
}

impl ActionVerifier {
    pub fn new(bus: Arc<SubscriptionBus>, config: &VerifierConfig) -> Self {
        Self {
            bus,
            comparator: Comparator::from_config(config),
            poll_slice: config.poll_slice(),
        }
    }

    /// Wait up to `timeout` for the next action published for `user_id`.
    ///
    /// Resolves exactly once: with a comparison, a timeout result, or an
    /// error result. The subscription is released on every path.
    pub async fn await_and_verify(
        &self,
        user_id: &str,
        expected: ExpectedAction,
        timeout: Duration,
    ) -> ComparisonResult {
        let mut subscription = self.bus.subscribe(user_id);
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        info!(user_id, tool = %expected.tool_name, "Awaiting action for {:?}", timeout);

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!(user_id, "Verification timed out");
                return ComparisonResult::timed_out(expected);
            }
            let slice = self.poll_slice.min(deadline - now);

            match tokio::time::timeout(slice, subscription.receiver()).await {
                Err(_) => debug!(user_id, "Still waiting for action"),
                Ok(Ok(Delivery::Action(action))) => {
                    let result = self.comparator.compare(&expected, &action);
                    info!(
                        user_id,
                        matched = result.matched,
                        confidence = result.confidence,
                        "Verification complete"
                    );
                    return result;
                }
                Ok(Ok(Delivery::Superseded)) => {
                    warn!(user_id, "Verification superseded by a newer request");
                    return ComparisonResult::failed(
                        expected,
                        "superseded by a newer verification request",
                    );
                }
                Ok(Err(_)) => {
                    warn!(user_id, "Subscription closed before an action arrived");
                    return ComparisonResult::failed(expected, "subscription closed");
                }
            }
        }
    }
}
