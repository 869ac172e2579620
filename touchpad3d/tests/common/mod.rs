#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use touchpad3d::{Session, config::SessionConfig, test_utils::MockTransport};

/// A configuration with short timeouts so unanswered instructions fail fast.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        command_timeout: Duration::from_millis(10),
        update_timeout: Duration::from_millis(10),
        version_wait: Duration::from_millis(50),
        loader_timeout: Duration::from_millis(200),
        retrieve_wait: Duration::from_millis(10),
        reader_poll: Duration::from_millis(5),
        ..Default::default()
    }
}

pub fn open(mock: &Arc<MockTransport>, config: SessionConfig) -> Session {
    let mut session = Session::new(mock.clone(), config);
    session.open().expect("mock transports open");
    session
}
