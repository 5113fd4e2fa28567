//! Operator notifications.

use crate::config::EmailConfig;
use anyhow::Result;
use demux_stats::StatsSummary;
use log::{info, warn};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub message: String,
    pub run: Option<String>,
    pub summary: Option<StatsSummary>,
    pub from: String,
    pub to: Vec<String>,
}

impl Notification {
    pub fn new(email: &EmailConfig, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Notification {
            subject: subject.into(),
            message: message.into(),
            run: None,
            summary: None,
            from: email.from.clone(),
            to: email.to.clone(),
        }
    }

    pub fn for_run(mut self, run: &str) -> Self {
        self.run = Some(run.to_string());
        self
    }

    pub fn with_summary(mut self, summary: StatsSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Body of the message sent when a `process-run` child fails for a reason
/// other than bcl2fastq itself.
pub fn run_failure_message(
    run: &str,
    command: &str,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    log_path: &Path,
) -> String {
    let code = code.map_or_else(|| "killed by signal".to_string(), |c| c.to_string());
    format!(
        "Run Failed: {run}\ncmd: {command}\nreturn code: {code}\nstandard out: {stdout}\n\
         standard error: {stderr}\nsee log: {}\n",
        log_path.display()
    )
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the process log instead of sending mail.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        warn!(
            "{} (to: {}): {}",
            notification.subject,
            notification.to.join(", "),
            notification.message
        );
        if let Some(summary) = &notification.summary {
            info!("summary: {}", serde_json::to_string(summary)?);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Keeps every notification for inspection.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub(crate) fn take(&self) -> Vec<Notification> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn test_builder() {
        let email = EmailConfig {
            from: "seq@example.org".to_string(),
            to: vec!["core@example.org".to_string()],
        };
        let n = Notification::new(&email, "Run Failed", "details").for_run("r1");
        assert_eq!(n.run.as_deref(), Some("r1"));
        assert_eq!(n.from, "seq@example.org");
        assert_eq!(n.to, vec!["core@example.org"]);
        assert!(n.summary.is_none());
        LogNotifier.send(&n).unwrap();
    }

    #[test]
    fn test_run_failure_message() {
        let msg = run_failure_message(
            "r1",
            "demux_runner process-run --run-dir /seq/runs/r1",
            Some(1),
            "",
            "ERROR: no RunInfo.xml",
            Path::new("/seq/logs/r1.log"),
        );
        assert_eq!(
            msg,
            "Run Failed: r1\ncmd: demux_runner process-run --run-dir /seq/runs/r1\n\
             return code: 1\nstandard out: \nstandard error: ERROR: no RunInfo.xml\n\
             see log: /seq/logs/r1.log\n"
        );
        assert!(run_failure_message("r1", "x", None, "", "", Path::new("l"))
            .contains("return code: killed by signal"));
    }
}
