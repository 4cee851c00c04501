//! Output sinks and user notifications.
//!
//! Scripts print through an [`OutputSink`]; handlers report blocking
//! conditions (compile failures, missing entry points) through a
//! [`Notifier`]. Presentation of either is up to the embedding host.

use std::io::Write;
use std::sync::Mutex;

/// Destination for script output. Shared by reference with the caller.
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);
    fn write_error(&self, text: &str);
}

/// Which stream an [`OutputEntry`] was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Out,
    Err,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputEntry {
    pub channel: Channel,
    pub text: String,
}

/// In-memory sink that keeps every write in order.
#[derive(Debug, Default)]
pub struct BufferedOutput {
    entries: Mutex<Vec<OutputEntry>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OutputEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Concatenated text written to the normal channel.
    pub fn stdout(&self) -> String {
        self.collect(Channel::Out)
    }

    /// Concatenated text written to the error channel.
    pub fn stderr(&self) -> String {
        self.collect(Channel::Err)
    }

    fn collect(&self, channel: Channel) -> String {
        self.entries()
            .into_iter()
            .filter(|entry| entry.channel == channel)
            .map(|entry| entry.text)
            .collect()
    }

    fn push(&self, channel: Channel, text: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(OutputEntry {
                channel,
                text: text.to_string(),
            });
        }
    }
}

impl OutputSink for BufferedOutput {
    fn write(&self, text: &str) {
        self.push(Channel::Out, text);
    }

    fn write_error(&self, text: &str) {
        self.push(Channel::Err, text);
    }
}

/// Sink bound to the process's stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl OutputSink for ConsoleOutput {
    fn write(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn write_error(&self, text: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        if !text.ends_with('\n') {
            let _ = stderr.write_all(b"\n");
        }
    }
}

/// Blocking user-facing notification (a dialog in GUI hosts).
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Notifier that turns every notification into a `warn` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::warn!(title, message, "script notification");
    }
}

/// Notifier that remembers what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes
            .lock()
            .map(|notes| notes.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.notes.lock().map(|notes| notes.len()).unwrap_or(0)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        if let Ok(mut notes) = self.notes.lock() {
            notes.push((title.to_string(), message.to_string()));
        }
    }
}
