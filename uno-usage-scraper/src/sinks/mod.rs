pub mod fanout;
pub mod hour_usage;
pub mod notification;

pub use fanout::FanoutSink;
pub use hour_usage::HourUsageSink;
pub use notification::{LogNotifier, Notifier, NotifyError, UsageSummarySink, WebhookNotifier};
