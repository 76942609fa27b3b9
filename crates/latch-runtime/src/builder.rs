//! Runtime builder
//!
//! Assembles a [`NodeRuntime`] for one role: validates the configuration,
//! generates a node id when none is supplied, and injects the default
//! strategy for the role (or a caller-provided one).

use std::sync::Arc;

use uuid::Uuid;

use latch_core::{LatchConfig, LatchError, NodeId, NodeInfo, NodeRole};

use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::roles::{RoleStrategy, SchedulerStrategy, ServerStrategy, WorkerStrategy};
use crate::runtime::NodeRuntime;

// ----------------------------------------------------------------------------
// Node Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for [`NodeRuntime`]
pub struct NodeRuntimeBuilder {
    role: NodeRole,
    node_id: Option<NodeId>,
    listen_addr: Option<String>,
    config: Option<LatchConfig>,
    strategy: Option<Arc<dyn RoleStrategy>>,
}

impl NodeRuntimeBuilder {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            node_id: None,
            listen_addr: None,
            config: None,
            strategy: None,
        }
    }

    /// Set an explicit node id (defaults to `<role>-<uuid>`)
    pub fn node_id<I: Into<NodeId>>(mut self, node_id: I) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Set the listen address
    ///
    /// Defaults to the configured scheduler endpoint for the scheduler
    /// role, and `127.0.0.1:0` (any free port) otherwise.
    pub fn listen<S: Into<String>>(mut self, addr: S) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the configuration (defaults to `LatchConfig::default()`)
    pub fn config(mut self, config: LatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the role's default strategy
    pub fn strategy(mut self, strategy: Arc<dyn RoleStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Validate and assemble the runtime
    pub fn build(self) -> Result<NodeRuntime, LatchError> {
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(LatchError::config_error)?;
        let config = config.into_shared();

        let node_id = self
            .node_id
            .unwrap_or_else(|| NodeId::new(format!("{}-{}", self.role, Uuid::new_v4())));
        let listen_addr = self.listen_addr.unwrap_or_else(|| match self.role {
            NodeRole::Scheduler => config.cluster.scheduler_endpoint(),
            _ => "127.0.0.1:0".to_string(),
        });

        // The bound address replaces this placeholder when the server comes up.
        let info = NodeInfo::new(node_id, self.role, "0.0.0.0", 0);
        let node = Arc::new(Node::new(info, Arc::clone(&config)));

        let registry = match self.role {
            NodeRole::Scheduler => Some(Arc::new(NodeRegistry::new())),
            _ => None,
        };
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => match self.role {
                NodeRole::Worker => Arc::new(WorkerStrategy) as Arc<dyn RoleStrategy>,
                NodeRole::Server => Arc::new(ServerStrategy) as Arc<dyn RoleStrategy>,
                NodeRole::Scheduler => Arc::new(SchedulerStrategy::new(
                    Arc::clone(registry.as_ref().expect("scheduler registry just created")),
                    Arc::clone(&config),
                )),
            },
        };

        Ok(NodeRuntime::from_parts(node, strategy, registry, listen_addr))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_role() {
        let scheduler = NodeRuntimeBuilder::new(NodeRole::Scheduler).build().unwrap();
        assert_eq!(scheduler.node().role(), NodeRole::Scheduler);
        assert!(scheduler.registry().is_some());

        let worker = NodeRuntimeBuilder::new(NodeRole::Worker).build().unwrap();
        assert_eq!(worker.node().role(), NodeRole::Worker);
        assert!(worker.registry().is_none());
        assert!(worker
            .node()
            .node_id()
            .as_str()
            .starts_with("worker-"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = LatchConfig::default();
        config.cluster.worker_num = 0;
        config.cluster.server_num = 0;
        let err = NodeRuntimeBuilder::new(NodeRole::Worker)
            .config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, LatchError::Configuration { .. }));
    }

    #[test]
    fn test_explicit_identity() {
        let runtime = NodeRuntimeBuilder::new(NodeRole::Server)
            .node_id("s-7")
            .build()
            .unwrap();
        assert_eq!(runtime.node().node_id().as_str(), "s-7");
    }
}
