//! Dispatch loop
//!
//! The [`Dispatcher`] task owns the [`SessionManager`] and is the only place
//! session state changes. It multiplexes the exit signal, management
//! commands, captured frames, transmit triggers and neighbor expiry timers.
//! Everything outside the task talks to it through a [`SessionHandle`].

use crate::capture::CaptureProvider;
use crate::config::ConfigChange;
use crate::error::{LldpError, Result};
use crate::session::{EngineSettings, InboundPacket, NeighborPage, PortCounters, SessionManager};
use crate::types::{IfIndex, OperState, PortInfo};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

/// Request sent to the dispatcher
#[derive(Debug)]
pub enum Command {
    AddPort {
        info: PortInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    RemovePort {
        if_index: IfIndex,
        reply: oneshot::Sender<Result<()>>,
    },
    SetLinkState {
        if_index: IfIndex,
        state: OperState,
        reply: oneshot::Sender<Result<()>>,
    },
    GetNeighbors {
        start: usize,
        count: usize,
        reply: oneshot::Sender<NeighborPage>,
    },
    PortCounters {
        if_index: IfIndex,
        reply: oneshot::Sender<Result<PortCounters>>,
    },
    ApplyConfig {
        change: ConfigChange,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable client of the dispatch loop
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    exit: broadcast::Sender<()>,
}

impl SessionHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| LldpError::ChannelClosed("dispatcher commands"))?;
        response
            .await
            .map_err(|_| LldpError::ChannelClosed("dispatcher reply"))
    }

    pub async fn add_port(&self, info: PortInfo) -> Result<()> {
        self.request(|reply| Command::AddPort { info, reply }).await?
    }

    pub async fn remove_port(&self, if_index: IfIndex) -> Result<()> {
        self.request(|reply| Command::RemovePort { if_index, reply })
            .await?
    }

    /// Records the port's operational state and starts or stops it
    pub async fn set_link_state(&self, if_index: IfIndex, state: OperState) -> Result<()> {
        self.request(|reply| Command::SetLinkState {
            if_index,
            state,
            reply,
        })
        .await?
    }

    /// Bulk neighbor query over the up ports
    pub async fn get_neighbors(&self, start: usize, count: usize) -> Result<NeighborPage> {
        self.request(|reply| Command::GetNeighbors {
            start,
            count,
            reply,
        })
        .await
    }

    pub async fn port_counters(&self, if_index: IfIndex) -> Result<PortCounters> {
        self.request(|reply| Command::PortCounters { if_index, reply })
            .await?
    }

    pub async fn apply_config(&self, change: ConfigChange) -> Result<()> {
        self.request(|reply| Command::ApplyConfig { change, reply })
            .await?
    }

    /// Broadcasts the exit signal to the dispatcher and every capture task
    pub fn shutdown(&self) {
        let _ = self.exit.send(());
    }

    pub fn subscribe_exit(&self) -> broadcast::Receiver<()> {
        self.exit.subscribe()
    }
}

/// Owner of all port sessions
pub struct Dispatcher {
    manager: SessionManager,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Receiver<InboundPacket>,
    triggers: mpsc::Receiver<IfIndex>,
    exit: broadcast::Receiver<()>,
}

impl Dispatcher {
    /// Creates the dispatcher and the handle used to drive it
    pub fn new(provider: Arc<dyn CaptureProvider>, settings: EngineSettings) -> (Self, SessionHandle) {
        let capacity = settings.channel_capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (trigger_tx, trigger_rx) = mpsc::channel(capacity);
        let (exit_tx, exit_rx) = broadcast::channel(1);

        let manager = SessionManager::new(provider, settings, inbound_tx, trigger_tx, exit_tx.clone());
        let dispatcher = Self {
            manager,
            commands: command_rx,
            inbound: inbound_rx,
            triggers: trigger_rx,
            exit: exit_rx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            exit: exit_tx,
        };
        (dispatcher, handle)
    }

    /// Runs until the exit signal, then stops every port.
    pub async fn run(mut self) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.exit.recv() => {
                    info!("Exit signal received");
                    break;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                }
                Some(packet) = self.inbound.recv() => {
                    self.manager.handle_inbound(packet);
                }
                Some(if_index) = self.triggers.recv() => {
                    self.manager.handle_transmit(if_index).await;
                }
                Some(if_index) = self.manager.timers_mut().next_expired(), if !self.manager.timers().is_empty() => {
                    self.manager.handle_expiry(if_index);
                }
            }
        }

        self.manager.shutdown();
        info!("Dispatcher stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddPort { info, reply } => {
                let _ = reply.send(self.manager.add_port(info));
            }
            Command::RemovePort { if_index, reply } => {
                let _ = reply.send(self.manager.remove_port(if_index));
            }
            Command::SetLinkState {
                if_index,
                state,
                reply,
            } => {
                let _ = reply.send(self.set_link_state(if_index, state));
            }
            Command::GetNeighbors {
                start,
                count,
                reply,
            } => {
                let _ = reply.send(self.manager.get_neighbors(start, count));
            }
            Command::PortCounters { if_index, reply } => {
                let _ = reply.send(self.manager.port_counters(if_index));
            }
            Command::ApplyConfig { change, reply } => {
                let _ = reply.send(self.manager.apply_config(change));
            }
        }
    }

    fn set_link_state(&mut self, if_index: IfIndex, state: OperState) -> Result<()> {
        debug!(if_index, %state, "Link state change");
        self.manager.set_oper_state(if_index, state)?;
        match state {
            OperState::Up => self.manager.start(if_index),
            OperState::Down => self.manager.stop(if_index),
        }
    }
}
