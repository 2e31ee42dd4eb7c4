// remx-rs: client-side market data layer for tokenized property trading.
// Normalises backend order book / trade payloads, fetches REST snapshots,
// and keeps one shared reconnecting WebSocket channel for live updates.

pub mod config;      // endpoints + dev/prod flag from the environment
pub mod error;       // RestError / ChannelError taxonomy
pub mod market_data; // normalisation, REST fetchers, realtime channel, facade
pub mod telemetry;   // tracing init + optional Prometheus exporter
