//! Chrome-trace event sink
//!
//! A cheap, optionally-enabled sink for instant events. Disabled handles
//! are free to clone and no-op on every call; enabled handles accumulate
//! events that can be written as a `chrome://tracing` JSON file.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone, Default)]
pub struct TraceHandle {
  inner: Option<Arc<TraceState>>,
}

impl TraceHandle {
  pub fn enabled() -> Self {
    Self {
      inner: Some(Arc::new(TraceState::new())),
    }
  }

  pub fn disabled() -> Self {
    Self { inner: None }
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.is_some()
  }

  /// Records an instant event with integer arguments.
  pub fn instant(&self, name: &'static str, args: &[(&'static str, u64)]) {
    let Some(state) = &self.inner else {
      return;
    };
    let ts = state.start.elapsed().as_micros() as u64;
    let event = TraceEvent {
      name: name.to_string(),
      cat: "filterpipe".to_string(),
      ph: "i",
      ts,
      pid: std::process::id(),
      args: args.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    };
    if let Ok(mut events) = state.events.lock() {
      events.push(event);
    }
  }

  pub fn event_count(&self) -> usize {
    match &self.inner {
      Some(state) => state.events.lock().map(|e| e.len()).unwrap_or(0),
      None => 0,
    }
  }

  pub fn write_chrome_trace(&self, path: &Path) -> std::io::Result<()> {
    let Some(state) = &self.inner else {
      return Ok(());
    };
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    let events = match state.events.lock() {
      Ok(events) => events.clone(),
      Err(err) => err.into_inner().clone(),
    };
    let mut file = std::fs::File::create(path)?;
    let trace_file = TraceFile {
      trace_events: events,
    };
    serde_json::to_writer(&mut file, &trace_file)?;
    file.write_all(b"\n")
  }
}

struct TraceState {
  start: Instant,
  events: Mutex<Vec<TraceEvent>>,
}

impl TraceState {
  fn new() -> Self {
    Self {
      start: Instant::now(),
      events: Mutex::new(Vec::new()),
    }
  }
}

#[derive(Clone, Serialize)]
struct TraceEvent {
  name: String,
  cat: String,
  ph: &'static str,
  ts: u64,
  pid: u32,
  args: BTreeMap<String, u64>,
}

#[derive(Serialize)]
struct TraceFile {
  #[serde(rename = "traceEvents")]
  trace_events: Vec<TraceEvent>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn disabled_handle_drops_events() {
    let trace = TraceHandle::disabled();
    trace.instant("noop", &[("count", 1)]);
    assert!(!trace.is_enabled());
    assert_eq!(trace.event_count(), 0);
  }

  #[test]
  fn enabled_handle_accumulates() {
    let trace = TraceHandle::enabled();
    trace.instant("first", &[("count", 3)]);
    trace.instant("second", &[]);
    assert_eq!(trace.event_count(), 2);
  }

  #[test]
  fn writes_trace_json() {
    let trace = TraceHandle::enabled();
    trace.instant("event", &[("surfaces", 2)]);
    let dir = std::env::temp_dir().join("filterpipe-trace-test");
    let path = dir.join("trace.json");
    trace.write_chrome_trace(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("traceEvents"));
    assert!(text.contains("surfaces"));
    let _ = std::fs::remove_dir_all(&dir);
  }
}
