use tracing::error;

/// Where fatal run failures get reported.
pub trait Alerter: Send + Sync {
    fn alert(&self, subject: &str, detail: &str);
}

/// Reports alerts through the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn alert(&self, subject: &str, detail: &str) {
        error!(alert = true, "{subject}: {detail}");
    }
}
