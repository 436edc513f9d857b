//! Record routing.
//!
//! A [`RoutingContext`] belongs to one producing step for the duration of
//! that step. It knows the step's declared output ports and deposits each
//! produced record into the matching downstream edge buffers.

use std::sync::Arc;

use tracing::warn;
use weft_workflow::{OutputPort, Record};

use crate::buffer::EdgeBufferStore;
use crate::error::EngineResult;

/// What happened to a routed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Deposited into `n` downstream buffers.
    Routed(usize),
    /// No declared port matched; the record was dropped.
    NoMatchingPort,
}

impl RouteOutcome {
    pub fn was_routed(&self) -> bool {
        matches!(self, RouteOutcome::Routed(_))
    }
}

/// Per-producer-step routing handle.
pub struct RoutingContext {
    execution_id: String,
    source_node_id: String,
    output_ports: Vec<OutputPort>,
    buffers: Arc<EdgeBufferStore>,
}

impl RoutingContext {
    pub fn new(
        execution_id: impl Into<String>,
        source_node_id: impl Into<String>,
        output_ports: Vec<OutputPort>,
        buffers: Arc<EdgeBufferStore>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            source_node_id: source_node_id.into(),
            // Control ports sequence only; records never flow through them.
            output_ports: output_ports.into_iter().filter(|p| !p.is_control).collect(),
            buffers,
        }
    }

    /// The producing step.
    pub fn source_node_id(&self) -> &str {
        &self.source_node_id
    }

    /// Declared data ports, in declaration order.
    pub fn ports(&self) -> &[OutputPort] {
        &self.output_ports
    }

    /// Route a record out of `source_port`. When `source_port` is `None`,
    /// the record's `_routePort` sentinel is consulted, falling back to the
    /// default port. Returns [`RouteOutcome::NoMatchingPort`] when nothing
    /// matches, which callers may surface as a warning.
    pub fn route_record(
        &self,
        record: Record,
        source_port: Option<&str>,
    ) -> EngineResult<RouteOutcome> {
        let port = match source_port {
            Some(p) => p.to_string(),
            None => match record.route_port() {
                Some(p) => p.to_string(),
                None => return self.route_to_default(record),
            },
        };

        let matching: Vec<&OutputPort> = self
            .output_ports
            .iter()
            .filter(|p| p.source_port == port)
            .collect();

        if matching.is_empty() {
            warn!(
                source = %self.source_node_id,
                port = %port,
                "no output port matches; dropping record"
            );
            return Ok(RouteOutcome::NoMatchingPort);
        }

        let count = matching.len();
        for target in matching {
            self.buffers.append(
                &self.execution_id,
                &target.target_node_id,
                &target.target_port,
                record.clone(),
            )?;
        }
        Ok(RouteOutcome::Routed(count))
    }

    /// Route to the first declared port. No-op when no ports are declared.
    pub fn route_to_default(&self, record: Record) -> EngineResult<RouteOutcome> {
        match self.output_ports.first() {
            Some(port) => {
                self.buffers.append(
                    &self.execution_id,
                    &port.target_node_id,
                    &port.target_port,
                    record,
                )?;
                Ok(RouteOutcome::Routed(1))
            }
            None => Ok(RouteOutcome::NoMatchingPort),
        }
    }

    /// Broadcast to every declared port.
    pub fn route_to_all_ports(&self, record: Record) -> EngineResult<RouteOutcome> {
        if self.output_ports.is_empty() {
            return Ok(RouteOutcome::NoMatchingPort);
        }
        for port in &self.output_ports {
            self.buffers.append(
                &self.execution_id,
                &port.target_node_id,
                &port.target_port,
                record.clone(),
            )?;
        }
        Ok(RouteOutcome::Routed(self.output_ports.len()))
    }
}
