use tracing::info;

/// Surfaces human readable status and error text. Callable from any thread.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        info!(target: "notification", "{}", message);
    }
}
