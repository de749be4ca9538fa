//! Link state controller
//!
//! Turns `{ifindex, "UP"|"DOWN"}` notifications into start/stop requests on
//! the dispatcher. Repeated notifications are forwarded as well: the session
//! manager treats them as no-ops, and a repeated UP retries a capture that
//! previously failed to open.

use crate::dispatcher::SessionHandle;
use crate::error::Result;
use crate::types::{IfIndex, OperState};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Link state change reported for a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNotification {
    pub if_index: i32,
    /// "UP" or "DOWN"
    pub state: String,
}

impl LinkNotification {
    pub fn new(if_index: i32, state: impl Into<String>) -> Self {
        Self {
            if_index,
            state: state.into(),
        }
    }
}

pub struct LinkStateController {
    handle: SessionHandle,
    states: HashMap<IfIndex, OperState>,
}

impl LinkStateController {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            states: HashMap::new(),
        }
    }

    /// Last state successfully applied to the port
    pub fn state(&self, if_index: IfIndex) -> Option<OperState> {
        self.states.get(&if_index).copied()
    }

    pub async fn handle_notification(&mut self, notification: LinkNotification) -> Result<()> {
        let state: OperState = notification.state.parse()?;
        let if_index = notification.if_index;

        if self.state(if_index) == Some(state) {
            debug!(if_index, %state, "Link state unchanged");
        } else {
            info!(if_index, %state, "Link state changed");
        }

        // Only applied states are recorded, so a failed UP leaves the port
        // reported as it was and a repeated UP retries it.
        self.handle.set_link_state(if_index, state).await?;
        self.states.insert(if_index, state);
        Ok(())
    }

    /// Consumes notifications until the channel closes or exit is signalled
    pub async fn run(
        mut self,
        mut notifications: mpsc::Receiver<LinkNotification>,
        mut exit: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = exit.recv() => break,
                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        break;
                    };
                    let if_index = notification.if_index;
                    if let Err(e) = self.handle_notification(notification).await {
                        warn!(if_index, error = %e, "Failed to apply link state");
                    }
                }
            }
        }
        debug!("Link state controller stopped");
    }
}
