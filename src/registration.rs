//! Startup subscription registration
//!
//! Host applications collect their subscribers in a [`SubscriberSet`] and
//! register them in one step once the service is built. Registration fails as
//! a whole when more than `max_subscription_failure_rate` of the entries could
//! not be subscribed.

use crate::service::PubSubService;
use courier_core::{
    PubSubError, PubSubResult, SharedHandler, SubscribeOptions, SubscriptionId,
};
use tracing::{error, info, warn};

struct Entry {
    topic: String,
    handler: SharedHandler,
    options: SubscribeOptions,
}

/// Subscribers declared by the host application
#[derive(Default)]
pub struct SubscriberSet {
    entries: Vec<Entry>,
}

/// Outcome of [`SubscriberSet::register_all`]
#[derive(Debug)]
pub struct RegistrationReport {
    pub registered: Vec<(String, SubscriptionId)>,
    /// Topics that failed, with the error
    pub failed: Vec<(String, PubSubError)>,
}

impl RegistrationReport {
    pub fn total(&self) -> usize {
        self.registered.len() + self.failed.len()
    }
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`SubscriberSet::push`]
    pub fn add(
        mut self,
        topic: impl Into<String>,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Self {
        self.push(topic, handler, options);
        self
    }

    pub fn push(&mut self, topic: impl Into<String>, handler: SharedHandler, options: SubscribeOptions) {
        self.entries.push(Entry {
            topic: topic.into(),
            handler,
            options,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe every entry on `service`
    ///
    /// # Errors
    ///
    /// Returns `PubSubError::StartupRegistration` when the failure ratio
    /// exceeds the configured maximum. Successful subscriptions are removed
    /// again before returning.
    pub async fn register_all(&self, service: &PubSubService) -> PubSubResult<RegistrationReport> {
        let mut report = RegistrationReport {
            registered: Vec::with_capacity(self.entries.len()),
            failed: Vec::new(),
        };

        for entry in &self.entries {
            match service
                .subscribe(&entry.topic, entry.handler.clone(), entry.options.clone())
                .await
            {
                Ok(id) => report.registered.push((entry.topic.clone(), id)),
                Err(e) => {
                    warn!(topic = %entry.topic, error = %e, "Subscriber registration failed");
                    report.failed.push((entry.topic.clone(), e));
                }
            }
        }

        let total = report.total();
        let max_failure_rate = service.config().max_subscription_failure_rate;
        let failure_rate = if total == 0 {
            0.0
        } else {
            report.failed.len() as f64 / total as f64
        };

        if failure_rate > max_failure_rate {
            error!(
                failed = report.failed.len(),
                total,
                max_failure_rate,
                "Startup registration aborted"
            );
            for (topic, id) in &report.registered {
                if let Err(e) = service.unsubscribe_handler(*id).await {
                    warn!(topic = %topic, error = %e, "Failed to roll back subscription");
                }
            }
            return Err(PubSubError::StartupRegistration {
                failed: report.failed.len(),
                total,
                max_failure_rate,
            });
        }

        info!(
            registered = report.registered.len(),
            failed = report.failed.len(),
            "Subscribers registered"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| &e.topic))
            .finish()
    }
}
