//! Dedicated networking thread for a [`Client`]

use crate::network::Client;
use log::info;
use shared::{NetError, TickThread};
use std::sync::Arc;

/// Calls [`Client::update`] once per tick interval on its own thread
///
/// Game code keeps talking to the same `Arc<Client>` through
/// `send_position` and `other_clients`; only this thread touches the
/// network in steady state.
pub struct TickDriver {
    client: Arc<Client>,
    thread: Option<TickThread>,
}

impl TickDriver {
    pub fn start(client: Arc<Client>) -> Result<Self, NetError> {
        let interval = client.config().tick_interval;
        let ticking = Arc::clone(&client);
        let thread = TickThread::spawn("client-network", interval, move || ticking.update())?;

        info!("Client network thread started ({:?} ticks)", interval);
        Ok(Self {
            client,
            thread: Some(thread),
        })
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(TickThread::is_running)
    }

    /// Stops and joins the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            info!("Client network thread stopped");
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
