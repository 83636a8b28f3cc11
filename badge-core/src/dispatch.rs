//! Command dispatch
//!
//! Handlers are registered per [`CommandId`] and run synchronously on the
//! main loop. Every call produces exactly one response.

use std::collections::HashMap;

use badge_proto::{CommandId, CommandResponse, ErrorKind, Payload};
use log::*;

use crate::context::DeviceContext;
use crate::error::CommandError;
use crate::state::SystemState;
use crate::transport::Transport;
use crate::update::UpdateManager;

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A connected peer
    Remote,
    /// Menu / buttons on the badge itself
    Local,
}

/// Everything a handler may touch
pub struct CommandContext<'a> {
    pub args: &'a [u8],
    pub origin: Origin,
    pub transport: &'a mut dyn Transport,
    pub state: &'a mut SystemState,
    pub device: &'a DeviceContext,
    pub updater: &'a UpdateManager,
}

/// Handler result: response payload plus bytes streamed after the response
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    pub payload: Payload,
    pub trailer: Vec<u8>,
}

impl Reply {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn payload(bytes: &[u8]) -> Result<Self, CommandError> {
        let payload = Payload::from_slice(bytes)
            .map_err(|_| CommandError::new(ErrorKind::DataTooLong, "response payload over 64 bytes"))?;
        Ok(Self { payload, trailer: Vec::new() })
    }

    pub fn with_trailer(mut self, trailer: Vec<u8>) -> Self {
        self.trailer = trailer;
        self
    }
}

/// Command handler function type
pub type CommandHandler =
    Box<dyn Fn(&mut CommandContext<'_>) -> Result<Reply, CommandError> + Send + Sync>;

/// Response and trailer produced for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub response: CommandResponse,
    pub trailer: Vec<u8>,
}

impl Dispatched {
    pub fn status(kind: ErrorKind) -> Self {
        Self { response: CommandResponse::status(kind), trailer: Vec::new() }
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<CommandId, CommandHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler, replacing any previous one
    pub fn command<F>(&mut self, id: CommandId, handler: F)
    where
        F: Fn(&mut CommandContext<'_>) -> Result<Reply, CommandError> + Send + Sync + 'static,
    {
        self.handlers.insert(id, Box::new(handler));
    }

    pub fn is_registered(&self, id: CommandId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Run the handler for `identifier`.
    ///
    /// Identifiers past the command table, or without a handler, answer
    /// `NoAction` and touch nothing.
    pub fn execute(&self, identifier: u32, ctx: &mut CommandContext<'_>) -> Dispatched {
        let Ok(id) = CommandId::try_from(identifier) else {
            warn!("unknown command {}", identifier);
            return Dispatched::status(ErrorKind::NoAction);
        };
        let Some(handler) = self.handlers.get(&id) else {
            warn!("no handler for {:?}", id);
            return Dispatched::status(ErrorKind::NoAction);
        };

        match handler(&mut *ctx) {
            Ok(reply) => {
                debug!("{:?} ({:?}) ok", id, ctx.origin);
                Dispatched { response: CommandResponse::ok(reply.payload), trailer: reply.trailer }
            }
            Err(e) => {
                warn!("{:?} ({:?}) failed: {}", id, ctx.origin, e);
                Dispatched::status(e.kind)
            }
        }
    }
}
