//! Per-message entry point: protocol registry plus the session-scoped flow table.
//!
//! A [`Session`] lives for one capture. Each call to [`Session::dissect`] hands the message to
//! the registered [`Dissector`], which builds fresh per-message state, walks the payload and,
//! for request/reply protocols, correlates the message through the session's [`FlowTable`].

use crate::matcher::{ConversationId, FlowTable, Timestamp, TransactionInfo};
use crate::protocols;
use crate::value::DecodedField;
use crate::walk::{MalformedReport, WalkLimits};
use std::collections::HashMap;
use std::net::SocketAddr;

/// What the capture layer knows about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    /// 1-based position in the capture.
    pub frame: u32,
    pub time: Timestamp,
    pub conversation: ConversationId,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Output for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Dissection {
    pub protocol: &'static str,
    /// One-line description (message type, sequence number).
    pub summary: String,
    pub fields: Vec<DecodedField>,
    pub malformed: Vec<MalformedReport>,
    pub transaction: Option<TransactionInfo>,
}

impl Dissection {
    pub fn new(protocol: &'static str) -> Self {
        Dissection { protocol, summary: String::new(), fields: Vec::new(), malformed: Vec::new(), transaction: None }
    }

    pub fn is_malformed(&self) -> bool {
        !self.malformed.is_empty()
    }

    pub fn is_duplicate(&self) -> bool {
        self.transaction.map(|t| t.is_duplicate).unwrap_or(false)
    }
}

/// Session resources a dissector may use while handling one message.
pub struct DissectContext<'s> {
    pub flows: &'s mut FlowTable,
    pub limits: WalkLimits,
}

pub trait Dissector {
    fn name(&self) -> &'static str;

    /// Transport ports the protocol is registered on by default.
    fn ports(&self) -> &'static [u16] {
        &[]
    }

    fn dissect(&self, meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection;
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

/// Protocol name → dissector, and transport port → protocol name.
#[derive(Default)]
pub struct Registry {
    dissectors: HashMap<&'static str, Box<dyn Dissector>>,
    ports: HashMap<u16, &'static str>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// All protocol handlers shipped with the crate, on their default ports.
    pub fn with_defaults() -> Self {
        let mut r = Registry::new();
        r.register(Box::new(protocols::ras::Ras));
        r.register(Box::new(protocols::radius::Radius));
        r.register(Box::new(protocols::dlep::Dlep));
        r.register(Box::new(protocols::scte35::Scte35));
        r.register(Box::new(protocols::zabbix::Zabbix));
        r
    }

    pub fn register(&mut self, dissector: Box<dyn Dissector>) {
        let name = dissector.name();
        for &port in dissector.ports() {
            self.ports.insert(port, name);
        }
        self.dissectors.insert(name, dissector);
    }

    /// Route `port` to an already registered protocol.
    pub fn map_port(&mut self, port: u16, protocol: &str) -> Result<(), SessionError> {
        let (&name, _) = self
            .dissectors
            .get_key_value(protocol)
            .ok_or_else(|| SessionError::UnknownProtocol(protocol.to_string()))?;
        self.ports.insert(port, name);
        Ok(())
    }

    pub fn get(&self, protocol: &str) -> Option<&dyn Dissector> {
        self.dissectors.get(protocol).map(|d| d.as_ref())
    }

    pub fn protocol_for_port(&self, port: u16) -> Option<&'static str> {
        self.ports.get(&port).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut v: Vec<_> = self.dissectors.keys().copied().collect();
        v.sort();
        v
    }
}

pub struct Session {
    flows: FlowTable,
    registry: Registry,
    limits: WalkLimits,
}

impl Session {
    pub fn new(registry: Registry, limits: WalkLimits) -> Self {
        Session { flows: FlowTable::new(), registry, limits }
    }

    pub fn with_defaults() -> Self {
        Session::new(Registry::with_defaults(), WalkLimits::default())
    }

    /// Start a new capture: all pending calls are forgotten.
    pub fn reset(&mut self) {
        self.flows.reset();
    }

    pub fn flows(&self) -> &FlowTable {
        &self.flows
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn dissect(&mut self, protocol: &str, meta: &MessageMeta, data: &[u8]) -> Result<Dissection, SessionError> {
        let dissector = self
            .registry
            .dissectors
            .get(protocol)
            .ok_or_else(|| SessionError::UnknownProtocol(protocol.to_string()))?;
        let mut cx = DissectContext { flows: &mut self.flows, limits: self.limits };
        Ok(dissector.dissect(meta, data, &mut cx))
    }

    /// Dispatch on the destination port, then the source port. `None` if neither is registered.
    pub fn dissect_by_port(&mut self, meta: &MessageMeta, data: &[u8]) -> Option<Dissection> {
        let protocol = self
            .registry
            .protocol_for_port(meta.destination.port())
            .or_else(|| self.registry.protocol_for_port(meta.source.port()))?;
        self.dissect(protocol, meta, data).ok()
    }
}
