use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

// One price level of the book, already normalised.
// `total` is always recomputed as price * quantity, never read off the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookEntry {
    pub price: f64,
    pub quantity: f64,
    pub total: f64,
}

impl BookEntry {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self {
            price,
            quantity,
            total: price * quantity,
        }
    }
}

/// Canonical order book: bids descending, asks ascending, so index 0 of
/// each side is the best offer by construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
    pub spread: f64,
    pub last_price: f64,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<&BookEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookEntry> {
        self.asks.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub total: f64,
}

// Order placement body. Wire names are snake_case on this endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub property_id: String,
    pub user_id: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

// Wire format: { "orderId": "...", "status": "pending", "message": "..." }
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub message: String,
}

// Inbound realtime frame: { "type": "orderbook:<propertyId>", "payload": ... }
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// Outbound realtime control frame: { "action": "subscribe", "eventType": "..." }
#[derive(Debug, Serialize)]
pub struct ControlFrame<'a> {
    pub action: ControlAction,
    #[serde(rename = "eventType")]
    pub event_type: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

impl<'a> ControlFrame<'a> {
    pub fn subscribe(event_type: &'a str) -> Self {
        Self {
            action: ControlAction::Subscribe,
            event_type,
        }
    }

    pub fn unsubscribe(event_type: &'a str) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            event_type,
        }
    }

    pub fn to_json(&self) -> String {
        // serializing a borrowed str + unit enum cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_match_wire_shape() {
        assert_eq!(
            ControlFrame::subscribe("orderbook:prop-1").to_json(),
            r#"{"action":"subscribe","eventType":"orderbook:prop-1"}"#
        );
        assert_eq!(
            ControlFrame::unsubscribe("trades:prop-1").to_json(),
            r#"{"action":"unsubscribe","eventType":"trades:prop-1"}"#
        );
    }

    #[test]
    fn envelope_tolerates_missing_payload() {
        let env: Envelope = serde_json::from_str(r#"{"type":"orderbook:p1"}"#).unwrap();
        assert_eq!(env.event_type, "orderbook:p1");
        assert!(env.payload.is_null());
    }

    #[test]
    fn order_receipt_decodes_camel_case() {
        let receipt: OrderReceipt = serde_json::from_str(
            r#"{"orderId":"ord-9","status":"pending","message":"queued"}"#,
        )
        .unwrap();
        assert_eq!(receipt.order_id, "ord-9");
        assert_eq!(receipt.status, OrderStatus::Pending);
        assert_eq!(receipt.message, "queued");
    }
}
