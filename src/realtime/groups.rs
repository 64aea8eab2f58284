//! Best-effort hub group membership
//!
//! The hub's group method names are not guaranteed across server versions,
//! so joining probes an ordered list of candidates and remembers the first one
//! that works for the rest of the socket's lifetime. The server forgets
//! memberships when a socket goes away, so the joined set is replayed on every
//! fresh socket.

use super::transport::Invoker;
use crate::core::error::TransportError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Mutex, RwLock};

/// Join method names, tried in order
pub const JOIN_CANDIDATES: [&str; 3] = ["JoinGroup", "AddToGroup", "SubscribeToGroup"];

/// Leave method names, tried in order
pub const LEAVE_CANDIDATES: [&str; 3] = ["LeaveGroup", "RemoveFromGroup", "UnsubscribeFromGroup"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupOp {
    Join,
    Leave,
}

impl GroupOp {
    fn candidates(self) -> &'static [&'static str] {
        match self {
            GroupOp::Join => &JOIN_CANDIDATES,
            GroupOp::Leave => &LEAVE_CANDIDATES,
        }
    }
}

#[derive(Debug, Default)]
struct ResolvedMethods {
    join: Option<&'static str>,
    leave: Option<&'static str>,
}

/// Outcome of replaying memberships on a fresh socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejoinReport {
    pub rejoined: Vec<String>,
    /// Refused by the hub and forgotten
    pub dropped: Vec<String>,
    /// Not replayed because the socket closed; still remembered
    pub pending: Vec<String>,
}

/// Groups the client believes it has joined
#[derive(Debug, Default)]
pub struct GroupMembership {
    joined: RwLock<BTreeSet<String>>,
    resolved: Mutex<ResolvedMethods>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of joined group names (sorted)
    pub fn joined(&self) -> Vec<String> {
        self.joined
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.joined
            .read()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.joined.read().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget resolved method names; called for every new socket
    pub fn reset_resolution(&self) {
        if let Ok(mut resolved) = self.resolved.lock() {
            *resolved = ResolvedMethods::default();
        }
    }

    /// Method name resolved for joins on the current socket, if any
    pub fn resolved_join_method(&self) -> Option<&'static str> {
        self.resolved.lock().ok().and_then(|r| r.join)
    }

    /// Join a group; records it on success
    pub async fn join(&self, invoker: &dyn Invoker, name: &str) -> bool {
        if name.trim().is_empty() {
            tracing::warn!("Refusing to join a group with an empty name");
            return false;
        }
        match self.call(invoker, GroupOp::Join, name).await {
            Ok(method) => {
                if let Ok(mut set) = self.joined.write() {
                    set.insert(name.to_string());
                }
                tracing::info!(group = name, method = method, "Joined group");
                true
            }
            Err(e) => {
                tracing::warn!(group = name, error = %e, "Failed to join group");
                false
            }
        }
    }

    /// Leave a group; forgets it on success
    pub async fn leave(&self, invoker: &dyn Invoker, name: &str) -> bool {
        match self.call(invoker, GroupOp::Leave, name).await {
            Ok(method) => {
                if let Ok(mut set) = self.joined.write() {
                    set.remove(name);
                }
                tracing::info!(group = name, method = method, "Left group");
                true
            }
            Err(e) => {
                tracing::warn!(group = name, error = %e, "Failed to leave group");
                false
            }
        }
    }

    /// Replay every membership on the current socket
    ///
    /// Groups the hub refuses are dropped from the set. Any other failure
    /// (the socket closing mid-batch) stops the replay and the remaining
    /// groups are kept for the next socket.
    pub async fn rejoin_all(&self, invoker: &dyn Invoker) -> RejoinReport {
        let mut report = RejoinReport::default();
        let mut names = self.joined().into_iter();
        while let Some(name) = names.next() {
            match self.call(invoker, GroupOp::Join, &name).await {
                Ok(_) => report.rejoined.push(name),
                Err(e @ TransportError::Invocation { .. }) => {
                    tracing::warn!(group = %name, error = %e, "Dropping group that failed to rejoin");
                    report.dropped.push(name);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Group replay interrupted; keeping the rest");
                    report.pending.push(name);
                    report.pending.extend(names);
                    break;
                }
            }
        }

        if !report.dropped.is_empty()
            && let Ok(mut set) = self.joined.write()
        {
            for name in &report.dropped {
                set.remove(name);
            }
        }

        tracing::info!(
            rejoined = report.rejoined.len(),
            dropped = report.dropped.len(),
            pending = report.pending.len(),
            "Replayed group memberships"
        );
        report
    }

    /// Invoke a group method, probing candidates until one succeeds
    async fn call(
        &self,
        invoker: &dyn Invoker,
        op: GroupOp,
        name: &str,
    ) -> Result<&'static str, TransportError> {
        let cached = self.resolved.lock().ok().and_then(|r| match op {
            GroupOp::Join => r.join,
            GroupOp::Leave => r.leave,
        });

        if let Some(method) = cached {
            invoker
                .invoke(method, vec![Value::String(name.to_string())])
                .await?;
            return Ok(method);
        }

        let mut last_error = None;
        for &method in op.candidates() {
            match invoker
                .invoke(method, vec![Value::String(name.to_string())])
                .await
            {
                Ok(_) => {
                    if let Ok(mut resolved) = self.resolved.lock() {
                        match op {
                            GroupOp::Join => resolved.join = Some(method),
                            GroupOp::Leave => resolved.leave = Some(method),
                        }
                    }
                    return Ok(method);
                }
                Err(e @ TransportError::Closed { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!(method = method, error = %e, "Group method candidate failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::Invocation {
            method: op.candidates().join("|"),
            message: "no candidate method".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Invoker that accepts one method name and rejects configured groups
    struct FakeHub {
        accepts: &'static str,
        leave_accepts: &'static str,
        rejects: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeHub {
        fn new(accepts: &'static str) -> Self {
            Self {
                accepts,
                leave_accepts: "LeaveGroup",
                rejects: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Invoker for FakeHub {
        async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
            self.calls.lock().unwrap().push(method.to_string());
            let group = arguments[0].as_str().unwrap_or_default().to_string();
            if (method == self.accepts || method == self.leave_accepts)
                && !self.rejects.contains(&group)
            {
                Ok(Value::Bool(true))
            } else {
                Err(TransportError::Invocation {
                    method: method.to_string(),
                    message: "Method does not exist".to_string(),
                })
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_join_probes_candidates_in_order() {
        let hub = FakeHub::new("SubscribeToGroup");
        let groups = GroupMembership::new();

        assert!(groups.join(&hub, "case-42").await);
        assert_eq!(hub.calls(), vec!["JoinGroup", "AddToGroup", "SubscribeToGroup"]);
        assert_eq!(groups.resolved_join_method(), Some("SubscribeToGroup"));
        assert!(groups.contains("case-42"));
    }

    #[tokio::test]
    async fn test_resolved_method_is_reused() {
        let hub = FakeHub::new("AddToGroup");
        let groups = GroupMembership::new();

        groups.join(&hub, "a").await;
        groups.join(&hub, "b").await;
        assert_eq!(hub.calls(), vec!["JoinGroup", "AddToGroup", "AddToGroup"]);

        groups.reset_resolution();
        assert_eq!(groups.resolved_join_method(), None);
    }

    #[tokio::test]
    async fn test_join_failure_is_not_recorded() {
        let hub = FakeHub::new("Nothing");
        let groups = GroupMembership::new();

        assert!(!groups.join(&hub, "case-1").await);
        assert!(groups.is_empty());
        assert_eq!(hub.calls().len(), JOIN_CANDIDATES.len());
    }

    #[tokio::test]
    async fn test_join_rejects_empty_name() {
        let hub = FakeHub::new("JoinGroup");
        let groups = GroupMembership::new();
        assert!(!groups.join(&hub, "  ").await);
        assert!(hub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_join_then_leave() {
        let hub = FakeHub::new("JoinGroup");
        let groups = GroupMembership::new();

        assert!(groups.join(&hub, "X").await);
        assert!(groups.leave(&hub, "X").await);
        assert!(!groups.joined().contains(&"X".to_string()));
    }

    #[tokio::test]
    async fn test_rejoin_all_tolerates_partial_failure() {
        let mut hub = FakeHub::new("JoinGroup");
        let groups = GroupMembership::new();
        for name in ["admins", "case-1", "case-2", "region-north"] {
            assert!(groups.join(&hub, name).await);
        }

        hub.rejects.insert("case-1".to_string());
        hub.rejects.insert("region-north".to_string());
        groups.reset_resolution();

        let report = groups.rejoin_all(&hub).await;
        assert_eq!(report.rejoined, vec!["admins", "case-2"]);
        assert_eq!(report.dropped, vec!["case-1", "region-north"]);
        assert_eq!(groups.joined(), vec!["admins", "case-2"]);
    }

    /// Invoker whose socket dies after a number of successful calls
    struct DyingHub {
        accepted: Mutex<u32>,
        limit: u32,
    }

    #[async_trait]
    impl Invoker for DyingHub {
        async fn invoke(&self, method: &str, _arguments: Vec<Value>) -> Result<Value, TransportError> {
            let mut accepted = self.accepted.lock().unwrap();
            if *accepted < self.limit && method == "JoinGroup" {
                *accepted += 1;
                Ok(Value::Bool(true))
            } else {
                Err(TransportError::Closed {
                    code: Some(1006),
                    reason: None,
                })
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rejoin_all_keeps_groups_when_socket_closes() {
        let hub = DyingHub {
            accepted: Mutex::new(0),
            limit: 3,
        };
        let groups = GroupMembership::new();
        for name in ["case-1", "case-2", "case-3"] {
            assert!(groups.join(&hub, name).await);
        }

        // the replay socket accepts one join, then drops
        let replay = DyingHub {
            accepted: Mutex::new(0),
            limit: 1,
        };
        groups.reset_resolution();
        let report = groups.rejoin_all(&replay).await;
        assert_eq!(report.rejoined, vec!["case-1"]);
        assert!(report.dropped.is_empty());
        assert_eq!(report.pending, vec!["case-2", "case-3"]);
        assert_eq!(groups.joined(), vec!["case-1", "case-2", "case-3"]);
    }

    #[tokio::test]
    async fn test_rejoin_all_on_empty_set() {
        let hub = FakeHub::new("JoinGroup");
        let groups = GroupMembership::new();
        let report = groups.rejoin_all(&hub).await;
        assert_eq!(report, RejoinReport::default());
        assert!(hub.calls().is_empty());
    }
}
