use super::{CaptureCommand, Command, Engine, EngineError, EngineMsg, EngineSnapshot};
use crate::settings::LiveSettings;
use log::warn;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cloneable command side of a running engine.
#[derive(Clone)]
pub struct EngineSender {
    tx: mpsc::Sender<EngineMsg>,
}

impl EngineSender {
    fn send(&self, msg: EngineMsg) -> Result<(), EngineError> {
        self.tx.send(msg).map_err(|_| EngineError::Disconnected)
    }

    pub fn command(&self, command: Command) -> Result<(), EngineError> {
        self.send(EngineMsg::Command(command))
    }

    pub fn capture(&self, command: CaptureCommand) -> Result<(), EngineError> {
        self.send(EngineMsg::Capture(command))
    }

    pub fn start(&self) -> Result<(), EngineError> {
        self.command(Command::Start)
    }

    pub fn next(&self) -> Result<(), EngineError> {
        self.command(Command::Next)
    }

    pub fn previous(&self) -> Result<(), EngineError> {
        self.command(Command::Previous)
    }

    pub fn jump_to(&self, index: usize) -> Result<(), EngineError> {
        self.command(Command::JumpTo(index))
    }

    pub fn toggle_pause(&self) -> Result<(), EngineError> {
        self.command(Command::TogglePause)
    }

    pub fn reset(&self) -> Result<(), EngineError> {
        self.command(Command::Reset)
    }

    pub fn update_settings(&self, live: LiveSettings) -> Result<(), EngineError> {
        self.command(Command::UpdateSettings(live))
    }

    /// Answered after every message queued before it.
    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(EngineMsg::Snapshot(reply_tx))?;
        reply_rx.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Asks the engine to tear down and waits up to `timeout` for it.
    /// Returns false if the engine was already gone or did not answer.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.send(EngineMsg::Shutdown(Some(ack_tx))).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

/// Owner of the engine thread. Dropping it shuts the engine down.
pub struct EngineHandle {
    sender: EngineSender,
    worker: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub(super) fn spawn(
        engine: Engine,
        tx: mpsc::Sender<EngineMsg>,
        rx: mpsc::Receiver<EngineMsg>,
    ) -> Result<Self, EngineError> {
        let worker = thread::Builder::new()
            .name("cue-engine".to_string())
            .spawn(move || engine.run(rx))?;

        Ok(Self {
            sender: EngineSender { tx },
            worker: Some(worker),
        })
    }

    pub fn sender(&self) -> &EngineSender {
        &self.sender
    }

    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(EngineMsg::Shutdown(None));
            if worker.join().is_err() {
                warn!("Engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
