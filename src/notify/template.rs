//! Templated message channels.
//!
//! A [`TemplateChannel`] renders a subject and body from placeholders and
//! hands the resulting [`Message`] to a [`MessageTransport`]. Supported
//! placeholders: `{pipeline}`, `{status}`, `{run_id}`, `{failed}`,
//! `{duration}`, `{succeeded}`, `{skipped}`. Substitution is a single pass
//! over the template, so placeholder text inside a substituted value is kept
//! as is.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use super::{DEFAULT_SEND_TIMEOUT, Notification, NotificationChannel, NotifyError};

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Message {
    /// RFC 822 style text with `To` and `Subject` headers, as `sendmail -t` expects.
    pub fn to_mail(&self) -> String {
        format!(
            "To: {}\nSubject: {}\nContent-Type: text/html; charset=utf-8\n\n{}\n",
            self.recipients.join(", "),
            self.subject,
            self.body
        )
    }
}

/// Delivers a rendered message.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Writes messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl MessageTransport for LogTransport {
    async fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
        info!(
            recipients = %message.recipients.join(","),
            subject = %message.subject,
            body = %message.body,
            "notification"
        );
        Ok(())
    }
}

/// Pipes the message to an external program's stdin (e.g. `sendmail -t`).
#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransport {
    /// Create a transport running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Builder: kill the program if it has not exited after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `sendmail -t`, reading recipients from the message headers.
    pub fn sendmail() -> Self {
        Self::new("sendmail", vec!["-t".to_string()])
    }
}

#[async_trait]
impl MessageTransport for CommandTransport {
    async fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mail = message.to_mail();
        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(mail.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };
        // Dropping the exchange on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(NotifyError::Command {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Substitute notification placeholders in `template`.
pub fn render(template: &str, notification: &Notification) -> String {
    let duration = notification.duration();
    let duration = format!(
        "{}.{:03}s",
        duration.num_seconds(),
        duration.num_milliseconds().rem_euclid(1000)
    );

    let value = |name: &str| -> Option<String> {
        Some(match name {
            "pipeline" => notification.pipeline_id.as_str().to_string(),
            "status" => notification.status.to_string(),
            "run_id" => notification.run_id.to_string(),
            "failed" => notification.failed_task_names(),
            "duration" => duration.clone(),
            "succeeded" => notification.succeeded.to_string(),
            "skipped" => notification.skipped.to_string(),
            _ => return None,
        })
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let substituted = tail
            .find('}')
            .and_then(|close| value(&tail[1..close]).map(|v| (v, close)));
        match substituted {
            Some((v, close)) => {
                out.push_str(&v);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// A channel that renders a subject and body and hands them to a transport.
pub struct TemplateChannel {
    name: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
    transport: Arc<dyn MessageTransport>,
    timeout: Duration,
}

impl TemplateChannel {
    /// Create a channel delivering through `transport`.
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            recipients: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            transport,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Builder: send timeout enforced by the fan-out.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder: set the recipients.
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Render the message for `notification`.
    pub fn render(&self, notification: &Notification) -> Message {
        Message {
            recipients: self.recipients.clone(),
            subject: render(&self.subject, notification),
            body: render(&self.body, notification),
        }
    }
}

#[async_trait]
impl NotificationChannel for TemplateChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.render(notification);
        self.transport.deliver(&message).await
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunStatus;
    use crate::core::types::{PipelineId, RunId, TaskId};
    use crate::notify::FailedTask;
    use crate::core::run::TaskState;
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct CapturingTransport {
        messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageTransport for CapturingTransport {
        async fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
            self.messages.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn notification(status: RunStatus, failed: &[&str]) -> Notification {
        let now = Utc::now();
        Notification {
            pipeline_id: PipelineId::new("forex_data_pipeline"),
            run_id: RunId::new(),
            status,
            cancelled: false,
            started_at: now,
            ended_at: now + chrono::Duration::milliseconds(1500),
            succeeded: 6 - failed.len(),
            failed: failed.len(),
            skipped: 0,
            failures: failed
                .iter()
                .map(|id| FailedTask {
                    task_id: TaskId::new(*id),
                    state: TaskState::Failed,
                    kind: None,
                    message: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_placeholders() {
        let n = notification(RunStatus::Failed, &["downloading_rates"]);

        let text = render("{pipeline} {status}: failed={failed} in {duration}", &n);

        assert_eq!(
            text,
            "forex_data_pipeline FAILED: failed=downloading_rates in 1.500s"
        );
        assert_eq!(render("{run_id}", &n), n.run_id.to_string());
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let n = notification(RunStatus::Success, &[]);
        assert_eq!(render("{owner} {failed}", &n), "{owner} none");
        assert_eq!(render("{{status}} {", &n), "{SUCCESS} {");
    }

    #[test]
    fn test_render_does_not_expand_substituted_values() {
        let mut n = notification(RunStatus::Failed, &["{skipped}"]);
        n.pipeline_id = PipelineId::new("rates_{status}");

        let text = render("{pipeline} {status} failed={failed} skipped={skipped}", &n);

        assert_eq!(text, "rates_{status} FAILED failed={skipped} skipped=0");
    }

    #[tokio::test]
    async fn test_template_channel_delivers_rendered_message() {
        let transport = Arc::new(CapturingTransport {
            messages: Mutex::new(Vec::new()),
        });
        let channel = TemplateChannel::new(
            "email",
            "{pipeline}",
            "<h3>{pipeline} {status}</h3>",
            transport.clone(),
        )
        .with_recipients(vec!["admin@host.com".into()]);

        channel
            .send(&notification(RunStatus::Success, &[]))
            .await
            .unwrap();

        let messages = transport.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "forex_data_pipeline");
        assert_eq!(messages[0].body, "<h3>forex_data_pipeline SUCCESS</h3>");
        assert!(messages[0].to_mail().starts_with("To: admin@host.com\n"));
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let message = Message {
            recipients: vec![],
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(LogTransport.deliver(&message).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transport_pipes_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("mail.txt");
        let transport = CommandTransport::new(
            "sh",
            vec!["-c".into(), format!("cat > {}", out.display())],
        );
        let message = Message {
            recipients: vec!["admin@host.com".into()],
            subject: "forex_data_pipeline".into(),
            body: "done".into(),
        };

        transport.deliver(&message).await.unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("Subject: forex_data_pipeline"));
        assert!(written.ends_with("done\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transport_kills_stuck_program() {
        let transport = CommandTransport::new("sh", vec!["-c".into(), "sleep 30".into()])
            .with_timeout(Duration::from_millis(200));
        let message = Message {
            recipients: vec![],
            subject: "s".into(),
            body: "b".into(),
        };
        let start = std::time::Instant::now();

        let result = transport.deliver(&message).await;

        assert!(matches!(result, Err(NotifyError::Timeout(t)) if t == Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_template_channel_timeout() {
        let channel = TemplateChannel::new("log", "s", "b", Arc::new(LogTransport));
        assert_eq!(channel.timeout(), DEFAULT_SEND_TIMEOUT);
        let channel = channel.with_timeout(Duration::from_secs(3));
        assert_eq!(channel.timeout(), Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_transport_reports_exit_code() {
        let transport = CommandTransport::new(
            "sh",
            vec!["-c".into(), "cat > /dev/null; echo refused >&2; exit 3".into()],
        );
        let message = Message {
            recipients: vec![],
            subject: "s".into(),
            body: "b".into(),
        };

        match transport.deliver(&message).await {
            Err(NotifyError::Command { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "refused");
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }
}
