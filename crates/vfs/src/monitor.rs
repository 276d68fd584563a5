//! Persistent directory monitors.
//!
//! A monitor is the long-lived counterpart of a one-shot ready callback:
//! while at least one exists, the directory's file list is actively
//! maintained. Delivery is a channel per monitor; a client that dropped its
//! receiver simply stops receiving (the send error is ignored), but it must
//! still remove the monitor to release the directory's interest.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::attributes::AttrMask;
use crate::events::DirectoryEvent;

/// Identity of a monitoring client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
  /// Allocate a process-unique client identity.
  pub fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

/// Receiving half of a monitor's event channel.
pub type EventStream = mpsc::UnboundedReceiver<DirectoryEvent>;

/// One registered monitor.
#[derive(Debug)]
pub struct Monitor {
  pub client: ClientId,
  pub include_hidden: bool,
  pub attrs: AttrMask,
  sender: mpsc::UnboundedSender<DirectoryEvent>,
}

impl Monitor {
  pub fn new(client: ClientId, include_hidden: bool, attrs: AttrMask) -> (Self, EventStream) {
    let (sender, rx) = mpsc::unbounded_channel();
    (
      Self {
        client,
        include_hidden,
        attrs,
        sender,
      },
      rx,
    )
  }
}

/// The monitors registered on one directory.
#[derive(Debug, Default)]
pub struct MonitorSet {
  monitors: Vec<Monitor>,
}

impl MonitorSet {
  pub fn add(&mut self, monitor: Monitor) {
    self.monitors.push(monitor);
  }

  /// Remove a client's monitor. Removing an unknown client is a no-op.
  pub fn remove(&mut self, client: ClientId) -> Option<Monitor> {
    let index = self.monitors.iter().position(|m| m.client == client)?;
    Some(self.monitors.remove(index))
  }

  pub fn is_empty(&self) -> bool {
    self.monitors.is_empty()
  }

  pub fn len(&self) -> usize {
    self.monitors.len()
  }

  /// Union of every monitor's requested attribute classes.
  pub fn wanted_attrs(&self) -> AttrMask {
    self
      .monitors
      .iter()
      .fold(AttrMask::empty(), |mask, m| mask | m.attrs)
  }

  /// Whether any monitor wants hidden files.
  pub fn any_include_hidden(&self) -> bool {
    self.monitors.iter().any(|m| m.include_hidden)
  }

  pub fn clients(&self) -> Vec<ClientId> {
    self.monitors.iter().map(|m| m.client).collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Monitor> {
    self.monitors.iter()
  }

  /// Deliver an event to every monitor. Disconnected receivers are skipped.
  pub fn emit(&self, event: &DirectoryEvent) {
    for monitor in &self.monitors {
      let _ = monitor.sender.send(event.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wanted_attrs_unions_monitors() {
    let mut set = MonitorSet::default();
    let (a, _rx_a) = Monitor::new(ClientId::next(), false, AttrMask::INFO);
    let (b, _rx_b) = Monitor::new(ClientId::next(), true, AttrMask::MOUNT);
    set.add(a);
    set.add(b);

    assert_eq!(set.wanted_attrs(), AttrMask::INFO | AttrMask::MOUNT);
    assert!(set.any_include_hidden());
  }

  #[test]
  fn test_remove_unknown_client_is_noop() {
    let mut set = MonitorSet::default();
    assert!(set.remove(ClientId::next()).is_none());
  }

  #[test]
  fn test_emit_reaches_every_monitor() {
    let mut set = MonitorSet::default();
    let (a, mut rx_a) = Monitor::new(ClientId::next(), false, AttrMask::INFO);
    let (b, mut rx_b) = Monitor::new(ClientId::next(), false, AttrMask::INFO);
    set.add(a);
    set.add(b);

    set.emit(&DirectoryEvent::DoneLoading);
    assert!(matches!(rx_a.try_recv(), Ok(DirectoryEvent::DoneLoading)));
    assert!(matches!(rx_b.try_recv(), Ok(DirectoryEvent::DoneLoading)));
  }
}
