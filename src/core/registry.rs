use std::sync::Arc;

use crate::api::{
    error::{BridgeError, BridgeResult},
    reader::PortOpener,
    session::PortSession,
    traits::BridgeHandler,
};
use crate::protocol::settings::{PortSettings, PortSettingsRecord};

/// Ordered list of configured ports, one session per physical port.
pub struct SessionRegistry {
    sessions: Vec<PortSession>,
    handler: Arc<dyn BridgeHandler>,
    opener: Option<Arc<dyn PortOpener>>,
}

impl SessionRegistry {
    pub fn new(handler: Arc<dyn BridgeHandler>) -> Self {
        Self {
            sessions: Vec::new(),
            handler,
            opener: None,
        }
    }

    /// Open ports through `opener` instead of the system serial layer.
    pub fn with_opener(mut self, opener: Arc<dyn PortOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Add a session for `settings` and return its index.
    pub fn add(&mut self, settings: PortSettings) -> BridgeResult<usize> {
        let port_id = settings.port_id().trim().to_string();
        if port_id.is_empty() {
            return Err(BridgeError::configuration("Selected port is blank."));
        }
        if self.position(&port_id).is_some() {
            return Err(BridgeError::conflict(format!(
                "Port {port_id} is already configured, re-select port and try again."
            )));
        }

        let index = self.sessions.len();
        let mut session = PortSession::new(settings, index, Arc::clone(&self.handler));
        if let Some(opener) = &self.opener {
            session = session.with_opener(Arc::clone(opener));
        }
        self.sessions.push(session);
        log::info!("added {port_id} as session {index}");
        Ok(index)
    }

    /// Shut down and drop the session at `index`; the ones after it move up.
    pub fn remove(&mut self, index: usize) -> BridgeResult<()> {
        if index >= self.sessions.len() {
            return Err(BridgeError::not_ready(format!("No session at index {index}")));
        }
        let session = self.sessions.remove(index);
        log::info!("removing {} (session {index})", session.port_id());
        session.remove();
        for (i, session) in self.sessions.iter().enumerate().skip(index) {
            session.set_index(i);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&PortSession> {
        self.sessions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PortSession> {
        self.sessions.get_mut(index)
    }

    /// Index of the session for `port_id`, ignoring surrounding whitespace.
    pub fn position(&self, port_id: &str) -> Option<usize> {
        let port_id = port_id.trim();
        self.sessions
            .iter()
            .position(|s| s.port_id().trim() == port_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PortSession> {
        self.sessions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn shutdown_all(&mut self) {
        for session in &mut self.sessions {
            session.shutdown();
        }
    }

    /// Current settings of every session, in order, for saving.
    pub fn settings_snapshot(&self) -> Vec<PortSettingsRecord> {
        self.sessions
            .iter()
            .map(|s| s.settings().read().to_record())
            .collect()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{error::ErrorKind, traits::NoOpHandler};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(NoOpHandler))
    }

    #[test]
    fn same_port_cannot_be_added_twice() {
        let mut registry = registry();
        assert_eq!(registry.add(PortSettings::new("COM1")).unwrap(), 0);
        let err = registry.add(PortSettings::new(" COM1 ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceConflict);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn blank_port_is_rejected() {
        let err = registry().add(PortSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn removal_reindexes_following_sessions() {
        let mut registry = registry();
        for port in ["COM1", "COM2", "COM3"] {
            registry.add(PortSettings::new(port)).unwrap();
        }
        registry.remove(0).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(0).unwrap().port_id(), "COM2");
        assert_eq!(registry.get(0).unwrap().index(), 0);
        assert_eq!(registry.get(1).unwrap().index(), 1);
        assert_eq!(registry.position("COM3"), Some(1));
        assert!(registry.remove(5).is_err());
    }

    #[test]
    fn snapshot_follows_session_order() {
        let mut registry = registry();
        registry.add(PortSettings::new("/dev/ttyUSB1")).unwrap();
        registry.add(PortSettings::new("/dev/ttyUSB0")).unwrap();
        let ports: Vec<_> = registry
            .settings_snapshot()
            .into_iter()
            .map(|r| r.port_id)
            .collect();
        assert_eq!(ports, ["/dev/ttyUSB1", "/dev/ttyUSB0"]);
    }
}
