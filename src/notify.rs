//! Notification collaborator contract. Sends are fire-and-forget from
//! the moderation engine's perspective: failures are logged and never
//! roll back a state transition.

use crate::element::{ElementRecord, UserInteraction};

/// Automated mail template keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTemplate {
    /// Element added or restored.
    Add,
    /// Element edited.
    Edit,
    /// Element deleted.
    Delete,
    /// Report resolved.
    Report,
}

/// External mail/notification service.
pub trait NotificationService: Send + Sync {
    /// Sends an automated mail about `element`. `report` is set only
    /// for per-report resolution notices.
    fn send_automated_mail(
        &self,
        template: MailTemplate,
        element: &ElementRecord,
        message: Option<&str>,
        report: Option<&UserInteraction>,
    ) -> Result<(), String>;
}

/// Notifier that only logs. Default when no mail transport is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotificationService for LogNotifier {
    fn send_automated_mail(
        &self,
        template: MailTemplate,
        element: &ElementRecord,
        message: Option<&str>,
        _report: Option<&UserInteraction>,
    ) -> Result<(), String> {
        tracing::info!(
            template = ?template,
            element_id = %element.id,
            message = message.unwrap_or(""),
            "automated mail"
        );
        Ok(())
    }
}
