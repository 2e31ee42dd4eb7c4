use thiserror::Error;

/// Failures from the REST fetchers. Variant messages are fixed and safe to
/// show in a UI; the transport cause travels as `source` and is only logged.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("market data request failed")]
    Transport(#[from] reqwest::Error),

    #[error("market data request returned status {status}")]
    Status { status: u16 },

    #[error("market data response could not be decoded")]
    Decode(#[source] serde_json::Error),

    #[error("order rejected: {message}")]
    Rejected { message: String },
}

/// Failures from the realtime channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket connect failed")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("websocket transport error")]
    Transport(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("websocket connection closed")]
    Closed,

    #[error("gave up reconnecting after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

pub type RestResult<T> = std::result::Result<T, RestError>;
