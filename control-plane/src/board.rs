//! Operator-facing record of intercepted flows
//!
//! Two collections: an append-only log of every snapshot ever published, and
//! the view the operator works from. Resolved flows stay in the view with
//! their final status until the operator removes them.

use intercept_common::{FlowId, FlowSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Forwarded,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEntry {
    #[serde(flatten)]
    pub snapshot: FlowSnapshot,
    pub status: FlowStatus,
}

#[derive(Debug, Default)]
pub struct InterceptBoard {
    log: Vec<FlowSnapshot>,
    seen: HashSet<FlowId>,
    view: Vec<BoardEntry>,
}

impl InterceptBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a published snapshot. A repeated publish of a known id (a
    /// retried delivery) is ignored and returns false.
    pub fn record(&mut self, snapshot: FlowSnapshot) -> bool {
        if !self.seen.insert(snapshot.id.clone()) {
            return false;
        }
        self.log.push(snapshot.clone());
        self.view.push(BoardEntry {
            snapshot,
            status: FlowStatus::Pending,
        });
        true
    }

    pub fn set_status(&mut self, id: &FlowId, status: FlowStatus) -> bool {
        match self.view.iter_mut().find(|entry| &entry.snapshot.id == id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Mark a pending entry with the operator's decision. An entry that is
    /// already decided keeps its status; only the proxy's outcome moves it.
    pub fn decide(&mut self, id: &FlowId, status: FlowStatus) -> bool {
        match self
            .view
            .iter_mut()
            .find(|entry| &entry.snapshot.id == id && entry.status == FlowStatus::Pending)
        {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &FlowId) -> Option<FlowStatus> {
        self.view
            .iter()
            .find(|entry| &entry.snapshot.id == id)
            .map(|entry| entry.status)
    }

    /// Remove from the view only; the log keeps it.
    pub fn remove(&mut self, id: &FlowId) -> bool {
        let before = self.view.len();
        self.view.retain(|entry| &entry.snapshot.id != id);
        self.view.len() != before
    }

    pub fn view(&self) -> &[BoardEntry] {
        &self.view
    }

    pub fn log(&self) -> &[FlowSnapshot] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use intercept_common::HeaderList;

    fn snapshot(id: &str) -> FlowSnapshot {
        FlowSnapshot {
            id: FlowId::from(id),
            method: "GET".into(),
            url: "http://x/y".into(),
            host: "x".into(),
            path: "/y".into(),
            scheme: "http".into(),
            port: 80,
            headers: HeaderList::new(),
            body: String::new(),
            body_base64: None,
            timestamp: Utc::now(),
            response: None,
        }
    }

    #[test]
    fn test_resolved_flows_stay_visible_until_removed() {
        let mut board = InterceptBoard::new();
        assert!(board.record(snapshot("a")));
        assert!(board.set_status(&FlowId::from("a"), FlowStatus::Forwarded));
        assert_eq!(board.view().len(), 1);
        assert_eq!(board.status(&FlowId::from("a")), Some(FlowStatus::Forwarded));

        assert!(board.remove(&FlowId::from("a")));
        assert!(board.view().is_empty());
        assert_eq!(board.log().len(), 1);
        assert!(!board.remove(&FlowId::from("a")));
    }

    #[test]
    fn test_decide_only_moves_pending_entries() {
        let mut board = InterceptBoard::new();
        board.record(snapshot("a"));
        assert!(board.decide(&FlowId::from("a"), FlowStatus::Dropped));
        assert!(!board.decide(&FlowId::from("a"), FlowStatus::Forwarded));
        assert_eq!(board.status(&FlowId::from("a")), Some(FlowStatus::Dropped));
        assert!(!board.decide(&FlowId::from("missing"), FlowStatus::Dropped));

        board.set_status(&FlowId::from("a"), FlowStatus::Pending);
        assert!(board.decide(&FlowId::from("a"), FlowStatus::Forwarded));
    }

    #[test]
    fn test_duplicate_publish_is_ignored() {
        let mut board = InterceptBoard::new();
        assert!(board.record(snapshot("a")));
        assert!(!board.record(snapshot("a")));
        board.remove(&FlowId::from("a"));
        assert!(!board.record(snapshot("a")));
        assert_eq!(board.log().len(), 1);
    }

    #[test]
    fn test_entry_serializes_flat() {
        let mut board = InterceptBoard::new();
        board.record(snapshot("a"));
        let json = serde_json::to_value(&board.view()[0]).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["status"], "pending");
    }
}
