/*!
 * Progress reporting for the processing pipeline
 */

use indicatif::ProgressBar;

/// Receives fire-and-forget progress updates; implementations must never fail
pub trait ProgressReporter: Send + Sync {
    /// Called with a short message and, when known, an overall percentage
    fn report(&self, message: &str, percent: Option<u8>);
}

// Implement ProgressReporter for closures
impl<F> ProgressReporter for F
where
    F: Fn(&str, Option<u8>) + Send + Sync,
{
    fn report(&self, message: &str, percent: Option<u8>) {
        self(message, percent)
    }
}

impl ProgressReporter for ProgressBar {
    fn report(&self, message: &str, percent: Option<u8>) {
        // Truncate long names to avoid display issues
        let display = if message.chars().count() > 60 {
            let tail: String = message
                .chars()
                .rev()
                .take(57)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("...{}", tail)
        } else {
            message.to_string()
        };

        self.set_message(display);
        if let Some(percent) = percent {
            self.set_position(u64::from(percent));
        }
    }
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _message: &str, _percent: Option<u8>) {}
}

/// Percentage of `done` out of `total`, clamped to 100
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }

    ((done.min(total) * 100) / total) as u8
}
