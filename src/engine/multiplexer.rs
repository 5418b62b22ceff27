// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Label-and-level routing of data messages to node input ports.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::engine::node::Delivery;
use crate::model::Message;

/// One subscribed input port.
pub(crate) struct PortAddress {
    pub node_name: String,
    pub port: usize,
    pub level: Option<String>,
    pub sender: UnboundedSender<Delivery>,
}

impl PortAddress {
    /// A subscription matches when it has no level scope or the store sits
    /// exactly at the subscribed level.
    fn matches(&self, message: &Message) -> bool {
        match &self.level {
            None => true,
            Some(level) => message.store.level_name() == level,
        }
    }
}

/// Fan-out table from product label to subscribed ports.
///
/// The runner uses one instance to route source-emitted stores; every
/// producing node owns its own instance covering just its output labels.
/// A send failure means the consumer already drained during shutdown or a
/// fatal drain, so it is not an error.
pub(crate) struct RouteTable {
    by_label: HashMap<String, Vec<PortAddress>>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable {
            by_label: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, label: &str, address: PortAddress) {
        self.by_label
            .entry(label.to_string())
            .or_default()
            .push(address);
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Delivers `message` to every port subscribed to `label` whose level
    /// scope matches the store.
    pub fn route(&self, label: &str, message: &Message) -> usize {
        let mut delivered = 0;
        if let Some(ports) = self.by_label.get(label) {
            for port in ports {
                if port.matches(message) {
                    let delivery = Delivery::Data {
                        message: message.clone(),
                        port: port.port,
                    };
                    if port.sender.send(delivery).is_ok() {
                        delivered += 1;
                    } else {
                        tracing::trace!(node = %port.node_name, label, "consumer inbox already closed");
                    }
                }
            }
        }
        delivered
    }

    /// Routes a message on each of the labels it was emitted under.
    pub fn route_all<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a str>,
        message: &Message,
    ) -> usize {
        labels
            .into_iter()
            .map(|label| self.route(label, message))
            .sum()
    }
}
