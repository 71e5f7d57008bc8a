//! Threshold alerting over the outcome log.

mod evaluator;
mod notify;
mod rule;
mod service;

pub use evaluator::AlertEvaluator;
pub use notify::{
    FanoutNotificationSink, LogNotificationSink, NotificationSink, NotifyError,
    WebhookNotificationSink,
};
pub use rule::{Alert, AlertCondition, AlertError, AlertRule, RuleType};
pub use service::AlertService;
