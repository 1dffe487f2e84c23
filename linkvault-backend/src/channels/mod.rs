pub mod dispatcher;
pub mod sources;
pub mod telegram;
pub mod types;

pub use dispatcher::MessageDispatcher;
pub use sources::SourceList;
pub use types::{DispatchOutcome, IgnoreReason, IncomingMessage, ListenerHandle};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Manages running platform listeners
pub struct ChannelManager {
    dispatcher: Arc<MessageDispatcher>,
    running: Arc<Mutex<HashMap<String, ListenerHandle>>>,
}

impl ChannelManager {
    pub fn new(dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            dispatcher,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().contains_key(name)
    }

    pub fn running_listeners(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }

    /// Start the Telegram channel-post listener
    pub fn start_telegram(&self, bot_token: String) -> Result<(), String> {
        let name = "telegram".to_string();
        if self.is_running(&name) {
            return Err(format!("Listener {} is already running", name));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.running.lock().insert(
            name.clone(),
            ListenerHandle {
                name: name.clone(),
                shutdown_tx,
            },
        );

        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            let result = telegram::start_telegram_listener(bot_token, dispatcher, shutdown_rx).await;
            if let Err(e) = result {
                log::error!("[telegram] Listener error: {}", e);
            }
            running.lock().remove(&name);
        });

        log::info!("[channels] Started telegram listener");
        Ok(())
    }

    pub fn stop(&self, name: &str) -> Result<(), String> {
        match self.running.lock().remove(name) {
            Some(handle) => {
                log::info!("[channels] Stopping {} listener", handle.name);
                let _ = handle.shutdown_tx.send(());
                Ok(())
            }
            None => Err(format!("Listener {} is not running", name)),
        }
    }

    pub fn stop_all(&self) {
        for name in self.running_listeners() {
            let _ = self.stop(&name);
        }
    }
}
