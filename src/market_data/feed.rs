// Typed per-property subscriptions over the shared realtime channel.
// Each handle holds a channel guard, so a mounted view keeps the connection
// alive and the last handle dropped tears it down.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::config::Config;
use crate::market_data::channel::{ChannelGuard, ConnectionStatus, RealtimeChannel, Subscription};
use crate::market_data::normaliser;
use crate::market_data::types::{BookSnapshot, Trade};

pub fn orderbook_topic(property_id: &str) -> String {
    format!("orderbook:{property_id}")
}

pub fn trades_topic(property_id: &str) -> String {
    format!("trades:{property_id}")
}

#[derive(Clone)]
pub struct MarketFeed {
    channel: RealtimeChannel,
}

impl MarketFeed {
    pub fn new(config: &Config) -> Self {
        Self {
            channel: RealtimeChannel::new(config),
        }
    }

    /// Live order book pushes for one property, normalised.
    pub fn subscribe_order_book(&self, property_id: &str) -> BookSubscription {
        let guard = self.channel.acquire();
        let inner = self.channel.subscribe(&orderbook_topic(property_id));
        BookSubscription {
            _guard: guard,
            inner,
        }
    }

    /// Live trade pushes for one property, normalised.
    pub fn subscribe_trades(&self, property_id: &str) -> TradeSubscription {
        let guard = self.channel.acquire();
        let inner = self.channel.subscribe(&trades_topic(property_id));
        TradeSubscription {
            _guard: guard,
            inner,
            buffered: VecDeque::new(),
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.channel.status()
    }
}

pub struct BookSubscription {
    _guard: ChannelGuard,
    inner: Subscription,
}

impl BookSubscription {
    /// Next normalised snapshot; `None` once the channel is torn down.
    pub async fn recv(&mut self) -> Option<BookSnapshot> {
        self.inner.recv().await.map(|payload| normaliser::book(&payload))
    }

    pub fn close(self) {
        self.inner.close();
    }
}

pub struct TradeSubscription {
    _guard: ChannelGuard,
    inner: Subscription,
    // the backend pushes either one trade or a batch; flatten batches here
    buffered: VecDeque<Trade>,
}

impl TradeSubscription {
    pub async fn recv(&mut self) -> Option<Trade> {
        loop {
            if let Some(trade) = self.buffered.pop_front() {
                return Some(trade);
            }
            let payload = self.inner.recv().await?;
            match payload.as_array() {
                Some(batch) => self.buffered.extend(batch.iter().map(normaliser::trade)),
                None => return Some(normaliser::trade(&payload)),
            }
        }
    }

    pub fn close(self) {
        self.inner.close();
    }
}
