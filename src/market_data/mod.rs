// Market data module entrypoint
pub mod channel;     // shared websocket connection, reconnect + topic fan-out
pub mod feed;        // typed per-property subscriptions
pub mod live_book;   // last-write-wins merge of snapshot + pushes
pub mod normaliser;  // converts raw backend records -> canonical types
pub mod rest;        // point-in-time snapshots + order placement
pub mod types;       // canonical book/trade/order types and wire frames
