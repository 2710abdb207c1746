//! Outbound notifications (e-mail service hooks).
//!
//! Delivery is fire-and-forget: [`dispatch`] spawns the send and only logs
//! failures. A notification never affects the outcome of the operation
//! that produced it.

use crate::db::{AdvisorId, EnrollmentRecord, SectionId, SemesterId, StudentId};
use crate::engine::Decision;
use futures::future::{self, BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Events the engine reports to the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A student submitted requests that are now awaiting approval
    EnrollmentSubmitted {
        student: StudentId,
        semester: SemesterId,
        records: Vec<EnrollmentRecord>,
    },
    /// An advisor decided one or more requests
    DecisionsMade {
        advisor: AdvisorId,
        decision: Decision,
        decided: Vec<(StudentId, SectionId)>,
    },
}

/// Errors raised while delivering a notification.
#[derive(Debug, Error, Clone)]
pub enum NotifyError {
    #[error("Failed to build notification client: {message}")]
    Client { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Notification endpoint answered {status}")]
    Rejected { status: u16 },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Network {
            message: err.to_string(),
        }
    }
}

/// Something that can deliver notifications.
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Sends `notification` on a background task, logging (never returning) failures.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let kind = notification.kind();
    let delivery = notifier.deliver(notification);
    tokio::spawn(async move {
        if let Err(e) = delivery.await {
            warn!(kind = kind, error = %e, "Notification delivery failed");
        }
    });
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Notification::EnrollmentSubmitted { .. } => "enrollment_submitted",
            Notification::DecisionsMade { .. } => "decisions_made",
        }
    }
}

/// Writes notifications to the log only. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        match &notification {
            Notification::EnrollmentSubmitted {
                student, records, ..
            } => info!(
                student = %student,
                sections = records.len(),
                "Notify: enrollment submitted"
            ),
            Notification::DecisionsMade {
                advisor,
                decision,
                decided,
            } => info!(
                advisor = %advisor,
                decision = ?decision,
                count = decided.len(),
                "Notify: decisions made"
            ),
        }
        future::ready(Ok(())).boxed()
    }
}

/// Posts notifications as JSON to the mail service's webhook.
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Client {
                message: e.to_string(),
            })?;

        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        let request = self.client.post(self.url.clone()).json(&notification);
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(NotifyError::Rejected {
                    status: response.status().as_u16(),
                });
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_shape() {
        let n = Notification::DecisionsMade {
            advisor: AdvisorId(3),
            decision: Decision::Reject,
            decided: vec![(StudentId(1), SectionId(2))],
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["kind"], "decisions_made");
        assert_eq!(value["advisor"], 3);
        assert_eq!(value["decision"], "reject");
        assert_eq!(value["decided"][0][1], 2);
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let n = Notification::EnrollmentSubmitted {
            student: StudentId(1),
            semester: SemesterId::new("FA24"),
            records: vec![],
        };
        assert!(LogNotifier.deliver(n).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_reports_network_failure() {
        let url = Url::parse("http://127.0.0.1:1/notify").unwrap();
        let notifier = WebhookNotifier::new(url, Duration::from_millis(500)).unwrap();
        let n = Notification::EnrollmentSubmitted {
            student: StudentId(1),
            semester: SemesterId::new("FA24"),
            records: vec![],
        };

        assert!(matches!(
            notifier.deliver(n).await,
            Err(NotifyError::Network { .. })
        ));
    }
}
