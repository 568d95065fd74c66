// Viewer registry for the live feed
// Tracks connected viewers and fans messages out to them

use crate::error::ServerError;
use crate::protocol::ServerMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ViewerId = Uuid;

/// Registry of live viewers and their outbound message channels
pub struct ViewerHub {
    senders: RwLock<HashMap<ViewerId, mpsc::UnboundedSender<ServerMessage>>>,
    max_viewers: usize,
}

impl ViewerHub {
    pub fn new(max_viewers: usize) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            max_viewers,
        }
    }

    /// Register a viewer
    pub fn register(&self, id: ViewerId, sender: mpsc::UnboundedSender<ServerMessage>) -> Result<(), ServerError> {
        let mut senders = self.senders.write();
        if senders.len() >= self.max_viewers {
            return Err(ServerError::ViewerLimit(self.max_viewers));
        }
        senders.insert(id, sender);
        info!("Viewer registered: {} ({} connected)", id, senders.len());
        Ok(())
    }

    /// Unregister a viewer
    pub fn unregister(&self, id: &ViewerId) {
        let mut senders = self.senders.write();
        if senders.remove(id).is_some() {
            info!("Viewer unregistered: {} ({} connected)", id, senders.len());
        }
    }

    /// Send to one viewer; false if it is gone
    pub fn send_to(&self, id: &ViewerId, message: ServerMessage) -> bool {
        let senders = self.senders.read();
        match senders.get(id) {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                debug!("Viewer {} not connected, dropping message", id);
                false
            }
        }
    }

    /// Send to every connected viewer; returns how many accepted it
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let mut dead = Vec::new();
        let mut sent = 0;
        {
            let senders = self.senders.read();
            for (id, sender) in senders.iter() {
                if sender.send(message.clone()).is_ok() {
                    sent += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            warn!("Removing {} closed viewer channels", dead.len());
            let mut senders = self.senders.write();
            for id in dead {
                senders.remove(&id);
            }
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
