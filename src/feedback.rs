//! User-facing success and failure signals.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Where mutation outcomes are reported. Fire-and-forget: implementations
/// must not panic and have nothing to return.
pub trait Feedback: Send + Sync {
  fn notify_success(&self, message: &str);
  fn notify_failure(&self, message: &str);
}

impl<F: Feedback + ?Sized> Feedback for Arc<F> {
  fn notify_success(&self, message: &str) {
    (**self).notify_success(message);
  }

  fn notify_failure(&self, message: &str) {
    (**self).notify_failure(message);
  }
}

/// Reports through the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl Feedback for TracingFeedback {
  fn notify_success(&self, message: &str) {
    info!(target: "fitout::feedback", "{}", message);
  }

  fn notify_failure(&self, message: &str) {
    warn!(target: "fitout::feedback", "{}", message);
  }
}

/// Prints to stderr, for the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleFeedback;

impl Feedback for ConsoleFeedback {
  fn notify_success(&self, message: &str) {
    eprintln!("✓ {}", message);
  }

  fn notify_failure(&self, message: &str) {
    eprintln!("✗ {}", message);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
  Success(String),
  Failure(String),
}

/// Collects every signal in order.
#[derive(Debug, Default)]
pub struct RecordingFeedback {
  signals: Mutex<Vec<Signal>>,
}

impl RecordingFeedback {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn signals(&self) -> Vec<Signal> {
    self
      .signals
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn successes(&self) -> Vec<String> {
    self
      .signals()
      .into_iter()
      .filter_map(|s| match s {
        Signal::Success(m) => Some(m),
        Signal::Failure(_) => None,
      })
      .collect()
  }

  pub fn failures(&self) -> Vec<String> {
    self
      .signals()
      .into_iter()
      .filter_map(|s| match s {
        Signal::Failure(m) => Some(m),
        Signal::Success(_) => None,
      })
      .collect()
  }

  fn push(&self, signal: Signal) {
    self
      .signals
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(signal);
  }
}

impl Feedback for RecordingFeedback {
  fn notify_success(&self, message: &str) {
    self.push(Signal::Success(message.to_string()));
  }

  fn notify_failure(&self, message: &str) {
    self.push(Signal::Failure(message.to_string()));
  }
}

/// Sends every signal to each of several surfaces.
pub struct FanoutFeedback {
  targets: Vec<Box<dyn Feedback>>,
}

impl FanoutFeedback {
  pub fn new(targets: Vec<Box<dyn Feedback>>) -> Self {
    Self { targets }
  }
}

impl Feedback for FanoutFeedback {
  fn notify_success(&self, message: &str) {
    for target in &self.targets {
      target.notify_success(message);
    }
  }

  fn notify_failure(&self, message: &str) {
    for target in &self.targets {
      target.notify_failure(message);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recording_keeps_order() {
    let feedback = RecordingFeedback::new();
    feedback.notify_success("Material created");
    feedback.notify_failure("Failed to delete material");

    assert_eq!(
      feedback.signals(),
      vec![
        Signal::Success("Material created".to_string()),
        Signal::Failure("Failed to delete material".to_string()),
      ]
    );
    assert_eq!(feedback.failures(), vec!["Failed to delete material"]);
  }

  #[test]
  fn test_fanout_reaches_every_target() {
    let a = Arc::new(RecordingFeedback::new());
    let b = Arc::new(RecordingFeedback::new());
    let fanout = FanoutFeedback::new(vec![
      Box::new(Arc::clone(&a)) as Box<dyn Feedback>,
      Box::new(Arc::clone(&b)),
      Box::new(TracingFeedback),
    ]);

    fanout.notify_success("Scope item created");
    assert_eq!(a.successes(), vec!["Scope item created"]);
    assert_eq!(b.successes(), vec!["Scope item created"]);
  }
}
