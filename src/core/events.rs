//! Progress reporting for long running model operations.

pub const FRACTION_FETCH_START: f32 = 0.0;
pub const FRACTION_EXTRACT_START: f32 = 0.5;
pub const FRACTION_DONE: f32 = 1.0;

pub const MESSAGE_EXTRACTING: &str = "[~] Extracting zip...";

/// Receives `(fraction, message)` pairs at phase boundaries. `fraction` is in
/// `0.0..=1.0` and never decreases within one operation.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, fraction: f32, message: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn report(&self, fraction: f32, message: &str) {
        self(fraction, message)
    }
}

/// Forwards progress to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, fraction: f32, message: &str) {
        tracing::info!("{:>3.0}% {message}", fraction * 100.0);
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f32, _message: &str) {}
}

pub fn downloading_message(name: &str) -> String {
    format!("[~] Downloading voice model with name {name}...")
}

pub fn installed_message(name: &str, remote: bool) -> String {
    if remote {
        format!("[+] {name} Model successfully downloaded!")
    } else {
        format!("[+] {name} Model successfully uploaded!")
    }
}
