use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::messages::{ButtonAction, DeviceEvent, RawMessage};
use crate::notify::Notifier;
use crate::player::{Completion, CueFinished, CuePlayer};

/// What the coordinator did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Played(ButtonAction),
    Malformed,
    Ignored(String),
    AlreadyPlaying,
}

/// Owns the "cue playing" gate and is the only place side effects start.
pub struct Coordinator {
    single: Box<dyn CuePlayer>,
    double: Box<dyn CuePlayer>,
    notifier: Option<Box<dyn Notifier>>,
    playing: bool,
    finished_tx: mpsc::UnboundedSender<CueFinished>,
    finished_rx: mpsc::UnboundedReceiver<CueFinished>,
}

impl Coordinator {
    pub fn new(
        single: Box<dyn CuePlayer>,
        double: Box<dyn CuePlayer>,
        notifier: Option<Box<dyn Notifier>>,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Coordinator {
            single,
            double,
            notifier,
            playing: false,
            finished_tx,
            finished_rx,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn handle_message(&mut self, msg: &RawMessage) -> Decision {
        debug!(
            "Received on {}: {}",
            msg.topic,
            String::from_utf8_lossy(&msg.payload)
        );

        let event = match DeviceEvent::decode(&msg.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("Problem unpacking message on {}: {}", msg.topic, err);
                return Decision::Malformed;
            }
        };

        let Some(action) = event.button_action() else {
            info!("Ignoring message with action {:?}", event.action);
            return Decision::Ignored(event.action);
        };

        if self.is_playing() {
            info!("Already playing");
            return Decision::AlreadyPlaying;
        }

        self.playing = true;
        info!("Playing {} cue", action);
        let done = Completion::new(self.finished_tx.clone());
        match action {
            ButtonAction::Single => self.single.play(done),
            ButtonAction::Double => self.double.play(done),
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(event.notification_text());
        }

        Decision::Played(action)
    }

    pub fn handle_finished(&mut self) {
        info!("Finished dinging");
        self.playing = false;
    }

    /// Runs until the inbound stream closes. Playback and notifications that
    /// are still in flight at that point are left to finish on their own.
    pub async fn run_loop(mut self, mut inbound: mpsc::Receiver<RawMessage>) {
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        self.handle_message(&msg);
                    }
                    None => {
                        info!("Inbound stream closed, done");
                        break;
                    }
                },
                Some(CueFinished) = self.finished_rx.recv() => {
                    self.handle_finished();
                }
            }
        }
    }
}
