//! Runtime settings
//!
//! The configuration surface recognized by every client component. All
//! fields have working defaults; deserializing an empty document yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Low-level socket flavor requested for the transport event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SocketType {
    Nio,
    Epoll,
    Kqueue,
}

/// Configuration recognized by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// True, if TLS is enabled.
    pub tls_enabled: bool,

    /// A path to the key store.
    pub key_store: Option<PathBuf>,

    /// A file containing the password for the key store.
    pub ks_password_file: Option<PathBuf>,

    /// A path to the trust store.
    pub trust_store: Option<PathBuf>,

    /// A file containing the password for the trust store.
    pub ts_password_file: Option<PathBuf>,

    /// True, if SASL plain text authentication is enabled.
    pub sasl_plain_text_enabled: bool,

    /// A file containing the username for SASL.
    pub username_file: Option<PathBuf>,

    /// A file containing the password for SASL.
    pub password_file: Option<PathBuf>,

    /// Handshake timeout, in seconds.
    pub handshake_timeout_sec: u64,

    /// Duration before requests time out. This is also the duration after
    /// which a reader hole-fills an empty address to force progress.
    pub request_timeout: Duration,

    /// Seconds without traffic before a connection is considered dead.
    pub idle_connection_timeout_sec: u64,

    /// The period at which keep-alive messages are sent on otherwise idle
    /// connections, in seconds.
    pub keep_alive_period_sec: u64,

    /// Duration before a connection attempt times out.
    pub connection_timeout: Duration,

    /// Duration before reconnecting to a disconnected peer.
    pub connection_retry_rate: Duration,

    /// The id of this client. Randomly generated by default.
    pub client_id: Uuid,

    /// Socket flavor for the transport event loop.
    pub socket_type: SocketType,

    /// Name format for event loop threads.
    pub event_loop_thread_format: String,

    /// Number of event loop threads.
    pub event_loop_threads: usize,

    /// True, if the event loop is shut down with the runtime.
    pub shutdown_event_loop: bool,

    /// Opaque channel options handed to the transport.
    pub channel_options: BTreeMap<String, String>,

    /// Duration before an orchestration workflow times out.
    pub workflow_timeout: Duration,

    /// Duration between workflow retries.
    pub workflow_retry_rate: Duration,

    /// Number of workflow retries before giving up.
    pub workflow_retry: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tls_enabled: false,
            key_store: None,
            ks_password_file: None,
            trust_store: None,
            ts_password_file: None,
            sasl_plain_text_enabled: false,
            username_file: None,
            password_file: None,
            handshake_timeout_sec: 10,
            request_timeout: Duration::from_secs(5),
            idle_connection_timeout_sec: 7,
            keep_alive_period_sec: 2,
            connection_timeout: Duration::from_millis(500),
            connection_retry_rate: Duration::from_secs(1),
            client_id: Uuid::new_v4(),
            socket_type: SocketType::Nio,
            event_loop_thread_format: "skein-event-{}".to_string(),
            event_loop_threads: 4,
            shutdown_event_loop: true,
            channel_options: BTreeMap::new(),
            workflow_timeout: Duration::from_secs(30),
            workflow_retry_rate: Duration::from_secs(2),
            workflow_retry: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_deserializes_to_defaults() {
        let settings: RuntimeSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.handshake_timeout_sec, 10);
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.socket_type, SocketType::Nio);
    }

    #[test]
    fn test_socket_type_wire_names() {
        let settings: RuntimeSettings =
            serde_json::from_str(r#"{"socket_type": "EPOLL"}"#).unwrap();
        assert_eq!(settings.socket_type, SocketType::Epoll);
    }

    #[test]
    fn test_distinct_clients_get_distinct_ids() {
        assert_ne!(
            RuntimeSettings::default().client_id,
            RuntimeSettings::default().client_id
        );
    }
}
