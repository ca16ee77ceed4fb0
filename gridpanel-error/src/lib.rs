//! Error taxonomy shared by every gridpanel transport.
//!
//! One sum type covers both transports and the simulation engine; the caller
//! always sees the terminal kind with the underlying message, never a
//! transport-specific re-labelling.

use std::time::Duration;
use thiserror::Error;

pub type PanelResult<T, E = PanelError> = Result<T, E>;

/// Failure kinds raised by the panel clients.
#[derive(Error, Debug)]
pub enum PanelError {
    /// 401/403 from the G2 API. Escalated once through forced
    /// re-authentication before it reaches the caller.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response schema mismatch or invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Status outside the endpoint's declared response set.
    #[error("unexpected status {status}: {detail}")]
    UnexpectedStatus { status: u16, detail: String },

    /// 500 from the G2 API.
    #[error("server error: {0}")]
    Server(String),

    /// 502/503/504 from the G2 API. Retried with exponential backoff.
    #[error("retriable HTTP {status}: {detail}")]
    RetriableHttp { status: u16, detail: String },

    /// TCP/TLS connection failure. Retried with exponential backoff.
    #[error("connection failed: {0}")]
    NetworkConnect(String),

    /// Per-request deadline exceeded. Retried with exponential backoff.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// G3 channel or protocol failure after the channel was established.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// G3 connect failure. Retriable only during factory auto-detection.
    #[error("rpc connect failed: {0}")]
    RpcConnect(String),

    /// Malformed wire frame or payload. Terminal for the in-flight RPC.
    #[error("codec error: {0}")]
    Codec(String),

    /// G3 discovery produced name/metric instance lists of different lengths.
    #[error("topology mismatch: {names} name instances vs {metrics} metric instances")]
    TopologyMismatch { names: usize, metrics: usize },

    /// Simulation configuration is missing, malformed or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Factory auto-detection reached the panel on neither transport.
    #[error("no transport reachable at {0}")]
    NoTransport(String),
}

impl PanelError {
    /// Transient kinds the retry engine may swallow up to its budget.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PanelError::RetriableHttp { .. }
                | PanelError::NetworkConnect(_)
                | PanelError::Timeout(_)
        )
    }

    /// Auth failures get one forced re-authentication pass on G2.
    pub fn is_auth(&self) -> bool {
        matches!(self, PanelError::Auth(_))
    }

    /// Classify an I/O failure on an established RPC channel.
    pub fn from_io(e: std::io::Error) -> Self {
        PanelError::Rpc(e.to_string())
    }

    /// Classify an HTTP status outside the 2xx range.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => PanelError::Auth(detail),
            422 => PanelError::Validation(detail),
            500 => PanelError::Server(detail),
            502 | 503 | 504 => PanelError::RetriableHttp { status, detail },
            _ => PanelError::UnexpectedStatus { status, detail },
        }
    }
}

impl From<std::io::Error> for PanelError {
    fn from(e: std::io::Error) -> Self {
        PanelError::from_io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(PanelError::from_status(401, "").is_auth());
        assert!(PanelError::from_status(403, "").is_auth());
        assert!(matches!(
            PanelError::from_status(422, "bad body"),
            PanelError::Validation(_)
        ));
        assert!(matches!(
            PanelError::from_status(500, ""),
            PanelError::Server(_)
        ));
        for status in [502u16, 503, 504] {
            assert!(PanelError::from_status(status, "").is_retriable());
        }
        assert!(matches!(
            PanelError::from_status(418, ""),
            PanelError::UnexpectedStatus { status: 418, .. }
        ));
    }

    #[test]
    fn retriable_kinds() {
        assert!(PanelError::Timeout(Duration::from_secs(1)).is_retriable());
        assert!(PanelError::NetworkConnect("refused".into()).is_retriable());
        assert!(!PanelError::Server("boom".into()).is_retriable());
        assert!(!PanelError::Rpc("stream reset".into()).is_retriable());
        assert!(!PanelError::TopologyMismatch { names: 3, metrics: 2 }.is_retriable());
    }
}
