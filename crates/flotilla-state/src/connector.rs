//! The capability used to talk to the cluster resource manager.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ConnectorError;
use crate::proto::Call;

/// Sends scheduler calls and reports the registered framework identity.
///
/// `send_call` hands the call off and returns; delivery, retries and
/// timeouts belong to the implementation.
pub trait Connector: Send + Sync {
    fn send_call(&self, call: Call) -> Result<(), ConnectorError>;

    /// The framework id, once registration has completed.
    fn framework_id(&self) -> Option<String>;
}

/// Connector that queues calls on a channel drained by the transport driver.
#[derive(Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<Call>,
    framework_id: Arc<RwLock<Option<String>>>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            tx,
            framework_id: Arc::new(RwLock::new(None)),
        };
        (connector, rx)
    }

    /// Record the framework id assigned at registration.
    pub fn set_framework_id(&self, id: impl Into<String>) {
        let id = id.into();
        debug!(framework_id = %id, "framework registered");
        *self
            .framework_id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);
    }
}

impl Connector for ChannelConnector {
    fn send_call(&self, call: Call) -> Result<(), ConnectorError> {
        self.tx.send(call).map_err(|_| ConnectorError::Closed)
    }

    fn framework_id(&self) -> Option<String> {
        self.framework_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
