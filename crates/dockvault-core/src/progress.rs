use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

/// One informational progress update. Events arrive in order; there is no
/// acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "lowercase")]
pub enum ProgressEvent {
    Percent(u8),
    Operation(String),
    Detail(String),
}

/// Sending half of a progress channel. A disabled sink, or one whose
/// receiver has gone away, swallows events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn percent(&self, value: u8) {
        self.send(ProgressEvent::Percent(value.min(100)));
    }

    pub fn operation(&self, label: &str) {
        self.send(ProgressEvent::Operation(label.to_owned()));
    }

    pub fn detail(&self, line: impl Into<String>) {
        self.send(ProgressEvent::Detail(line.into()));
    }
}
