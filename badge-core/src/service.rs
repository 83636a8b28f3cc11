//! Main loop of the badge core
//!
//! [`Service::poll`] is called over and over by the firmware's main task.
//! Each call handles at most one remote frame or, when the link is quiet,
//! one command queued by the local UI.

use std::time::Instant;

use badge_proto::{Args, CommandId, ErrorKind, UpdateState, COMMAND_ARGS_SIZE};
use log::*;

use crate::codec::{self, FrameReader, Inbound};
use crate::context::DeviceContext;
use crate::dispatch::{CommandContext, Dispatched, Dispatcher, Origin};
use crate::error::StorageError;
use crate::handlers;
use crate::state::{SystemState, UpdateRecord};
use crate::storage::Storage;
use crate::transport::{Detached, Transport};
use crate::update::{FlashStore, Progress, UpdateManager};

/// Commands the local UI may queue before the main loop drains them
pub const LOCAL_QUEUE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Nothing to do this round
    Idle,
    Handled {
        identifier: u32,
        origin: Origin,
        status: ErrorKind,
    },
    Disconnected,
    IdleTimeout,
    /// Restart into whatever the boot selector points at
    Restart,
}

#[derive(Debug)]
struct LocalCommand {
    identifier: u32,
    args: Args,
}

pub struct Service {
    device: DeviceContext,
    dispatcher: Dispatcher,
    updater: UpdateManager,
    storage: Box<dyn Storage>,
    state: SystemState,
    saved: SystemState,
    local: heapless::Deque<LocalCommand, LOCAL_QUEUE_SIZE>,
    reader: FrameReader,
    last_activity: Instant,
    restart_at: Option<Instant>,
    /// The link's read side carries image bytes for the update worker
    link_lent: bool,
}

impl Service {
    pub fn new(
        device: DeviceContext,
        flash: Box<dyn FlashStore>,
        storage: Box<dyn Storage>,
    ) -> Result<Self, StorageError> {
        let state = storage.load_state()?.unwrap_or_default();
        let updater = UpdateManager::new(flash, device.update_policy());
        let mut dispatcher = Dispatcher::new();
        handlers::register_builtin(&mut dispatcher);

        Ok(Self {
            device,
            dispatcher,
            updater,
            storage,
            saved: state.clone(),
            state,
            local: heapless::Deque::new(),
            reader: FrameReader::new(),
            last_activity: Instant::now(),
            restart_at: None,
            link_lent: false,
        })
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn progress(&self) -> Progress {
        self.updater.progress()
    }

    pub fn update_state(&self) -> UpdateState {
        self.updater.state()
    }

    pub fn updater(&self) -> &UpdateManager {
        &self.updater
    }

    /// Whether the link is handed to the update worker, so `poll` returns
    /// without waiting on it
    pub fn link_lent(&self) -> bool {
        self.link_lent
    }

    /// A new peer attached; forget any half-read frame from the last one
    pub fn connected(&mut self) {
        self.reader.reset();
        self.last_activity = Instant::now();
        self.link_lent = false;
    }

    /// Queue a command from the local UI; it skips the token check.
    pub fn submit_local(&mut self, identifier: u32, args: &[u8]) -> Result<(), ErrorKind> {
        if args.len() > COMMAND_ARGS_SIZE {
            return Err(ErrorKind::InvalidCommandSize);
        }
        let args = Args::from_slice(args).map_err(|_| ErrorKind::InvalidCommandSize)?;
        self.local
            .push_back(LocalCommand { identifier, args })
            .map_err(|_| ErrorKind::MaxCommandReached)
    }

    pub fn poll(&mut self, link: &mut dyn Transport) -> Event {
        if let Some(at) = self.restart_at {
            if Instant::now() >= at {
                self.persist();
                info!("restarting");
                return Event::Restart;
            }
        }

        let event = match self.absorb_update_outcome() {
            Some(event) => event,
            None => match self.poll_remote(link) {
                Event::Idle => self.run_local(),
                other => other,
            },
        };
        self.schedule_restart();
        self.persist();
        event
    }

    fn poll_remote(&mut self, link: &mut dyn Transport) -> Event {
        if !link.is_connected() {
            return Event::Idle;
        }
        // image bytes belong to the update worker until it reports back
        if self.link_lent {
            self.last_activity = Instant::now();
            return Event::Idle;
        }

        match self.reader.poll(link, self.device.poll_interval()) {
            Ok(Some(inbound)) => {
                self.last_activity = Instant::now();
                self.handle_remote(link, inbound)
            }
            Ok(None) => {
                let idle = self.last_activity.elapsed();
                if idle < self.device.config.idle_timeout() {
                    return Event::Idle;
                }
                info!(
                    "connection idle for {:?} ({} bytes of an unfinished frame), dropping it",
                    idle,
                    self.reader.pending()
                );
                self.reader.reset();
                Event::IdleTimeout
            }
            Err(e) => {
                info!("link closed: {}", e);
                Event::Disconnected
            }
        }
    }

    fn handle_remote(&mut self, link: &mut dyn Transport, inbound: Inbound) -> Event {
        let (identifier, dispatched) = match inbound {
            Inbound::Oversized { identifier } => {
                warn!("command {} declares more than {} argument bytes", identifier, COMMAND_ARGS_SIZE);
                (identifier, Dispatched::status(ErrorKind::InvalidCommandSize))
            }
            Inbound::Request(request) => {
                let identifier = request.identifier;
                if self.device.config.require_token && request.token != self.state.token {
                    warn!("rejecting command {}: bad token", identifier);
                    (identifier, Dispatched::status(ErrorKind::InvalidToken))
                } else {
                    let dispatched = self.execute(link, Origin::Remote, identifier, &request.args);
                    if request.command() == Some(CommandId::FirmwareUpdate)
                        && dispatched.response.status.is_ok()
                        && link.shares_data_channel()
                    {
                        self.link_lent = true;
                    }
                    (identifier, dispatched)
                }
            }
        };

        let written = codec::write_response(link, &dispatched.response).and_then(|()| {
            if dispatched.trailer.is_empty() {
                Ok(())
            } else {
                link.write_all(&dispatched.trailer)
            }
        });
        if let Err(e) = written {
            warn!("could not answer command {}: {}", identifier, e);
            return Event::Disconnected;
        }

        Event::Handled {
            identifier,
            origin: Origin::Remote,
            status: dispatched.response.status,
        }
    }

    fn run_local(&mut self) -> Event {
        let Some(command) = self.local.pop_front() else {
            return Event::Idle;
        };
        let dispatched = self.execute(&mut Detached, Origin::Local, command.identifier, &command.args);
        if !dispatched.response.status.is_ok() {
            info!(
                "local command {} answered {}",
                command.identifier, dispatched.response.status
            );
        }
        Event::Handled {
            identifier: command.identifier,
            origin: Origin::Local,
            status: dispatched.response.status,
        }
    }

    fn execute(
        &mut self,
        link: &mut dyn Transport,
        origin: Origin,
        identifier: u32,
        args: &[u8],
    ) -> Dispatched {
        if identifier != CommandId::UpdateStatus.id() {
            debug!("command {} from {:?}", identifier, origin);
        }
        let mut ctx = CommandContext {
            args,
            origin,
            transport: link,
            state: &mut self.state,
            device: &self.device,
            updater: &self.updater,
        };
        self.dispatcher.execute(identifier, &mut ctx)
    }

    /// Record a finished update. Returns `Disconnected` when the rest of an
    /// aborted image is still queued on the link.
    fn absorb_update_outcome(&mut self) -> Option<Event> {
        let mut event = None;
        if let Some(outcome) = self.updater.take_outcome() {
            let committed = outcome.state == UpdateState::Committed;
            self.state.last_update = Some(UpdateRecord { status: outcome.status as u32, committed });
            if committed {
                self.state.restart_pending = true;
            }
            if self.link_lent && outcome.left_image_unread() {
                warn!("update aborted mid-download, dropping the link it streamed on");
                self.reader.reset();
                event = Some(Event::Disconnected);
            }
            self.link_lent = false;
        }
        event
    }

    fn schedule_restart(&mut self) {
        if self.state.restart_pending && self.restart_at.is_none() {
            let delay = self.device.config.restart_delay();
            info!("restart scheduled in {:?}", delay);
            self.restart_at = Some(Instant::now() + delay);
        }
    }

    fn persist(&mut self) {
        if self.state == self.saved {
            return;
        }
        match self.storage.save_state(&self.state) {
            Ok(()) => self.saved = self.state.clone(),
            Err(e) => error!("failed to save state: {}", e),
        }
    }
}
