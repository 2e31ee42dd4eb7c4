use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use remx_rs::config::Config;
use remx_rs::market_data::feed::MarketFeed;
use remx_rs::market_data::live_book::LiveBook;
use remx_rs::market_data::normaliser;
use remx_rs::market_data::rest::{MarketApi, DEFAULT_TRADE_LIMIT};
use remx_rs::market_data::types::{OrderRequest, Side};
use remx_rs::telemetry;

#[derive(Parser)]
#[command(name = "remx", about = "Market data client for tokenized property trading")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and print the current order book for a property token
    Book { property_id: String },
    /// Fetch and print recent trades for a property token
    Trades {
        property_id: String,
        #[arg(long, default_value_t = DEFAULT_TRADE_LIMIT)]
        limit: usize,
    },
    /// Stream live order book and trades until Ctrl-C
    Watch { property_id: String },
    /// Place a buy/sell order
    Order {
        property_id: String,
        #[arg(long)]
        user_id: String,
        #[arg(long, value_parser = parse_side)]
        side: Side,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        amount: f64,
    },
    /// Probe backend liveness
    Health,
}

fn parse_side(raw: &str) -> Result<Side, String> {
    match raw.to_ascii_lowercase().as_str() {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(format!("`{other}` is not a side (expected buy or sell)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let config = Config::from_env().context("invalid REMX_* configuration")?;
    telemetry::init_tracing(config.log_filter());
    telemetry::init_metrics();

    let cli = Cli::parse();
    let api = MarketApi::new(&config);

    match cli.command {
        Command::Book { property_id } => {
            let raw = api.order_book(&property_id).await?;
            let book = normaliser::book(&raw);
            println!("Order book for {property_id}");
            println!("{:>12} {:>12} {:>12}", "PRICE", "QTY", "TOTAL");
            for ask in book.asks.iter().rev() {
                println!("{:>12.4} {:>12.4} {:>12.4}  ask", ask.price, ask.quantity, ask.total);
            }
            for bid in &book.bids {
                println!("{:>12.4} {:>12.4} {:>12.4}  bid", bid.price, bid.quantity, bid.total);
            }
            println!("Spread: {:.4}  Last: {:.4}", book.spread, book.last_price);
        }
        Command::Trades { property_id, limit } => {
            let raw = api.trade_history(&property_id, limit).await?;
            println!("Last {} trades for {property_id}", raw.len());
            for record in &raw {
                let trade = normaliser::trade(record);
                println!(
                    "{}  {:?}  {:.4} @ {:.4}  (total {:.4})",
                    trade.timestamp.to_rfc3339(),
                    trade.side,
                    trade.quantity,
                    trade.price,
                    trade.total,
                );
            }
        }
        Command::Watch { property_id } => {
            watch(&config, &api, &property_id).await?;
        }
        Command::Order {
            property_id,
            user_id,
            side,
            price,
            amount,
        } => {
            let receipt = api
                .place_order(&OrderRequest {
                    property_id,
                    user_id,
                    side,
                    price,
                    amount,
                })
                .await?;
            println!(
                "Order {} accepted: {:?} ({})",
                receipt.order_id, receipt.status, receipt.message
            );
        }
        Command::Health => {
            let alive = api.health().await;
            println!("backend alive: {alive}");
            if !alive {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

// Seed from the REST snapshot, then follow live pushes. The two sources are
// unordered relative to each other, so LiveBook arbitrates.
async fn watch(config: &Config, api: &MarketApi, property_id: &str) -> anyhow::Result<()> {
    let feed = MarketFeed::new(config);
    let mut books = feed.subscribe_order_book(property_id);
    let mut trades = feed.subscribe_trades(property_id);
    let mut status = feed.status();

    let mut view = LiveBook::new();
    if let Ok(raw) = api.order_book(property_id).await {
        view.apply(normaliser::book(&raw), Utc::now());
        print_bbo(property_id, &view);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("connection: {:?}", *status.borrow());
            }
            snapshot = books.recv() => {
                let Some(snapshot) = snapshot else { break };
                view.apply(snapshot, Utc::now());
                print_bbo(property_id, &view);
            }
            trade = trades.recv() => {
                let Some(trade) = trade else { break };
                println!(
                    "trade {:?} {:.4} @ {:.4}",
                    trade.side, trade.quantity, trade.price
                );
                view.record_trade(trade);
            }
        }
    }

    Ok(())
}

fn print_bbo(property_id: &str, view: &LiveBook) {
    match view.bbo() {
        (Some(bid), Some(ask)) => println!(
            "{property_id}  BID {:.4} @ {:.4} | ASK {:.4} @ {:.4} | spread {:.4}",
            bid.quantity, bid.price, ask.quantity, ask.price, view.spread()
        ),
        (Some(bid), None) => println!("{property_id}  BID {:.4} @ {:.4} | no asks", bid.quantity, bid.price),
        (None, Some(ask)) => println!("{property_id}  no bids | ASK {:.4} @ {:.4}", ask.quantity, ask.price),
        (None, None) => println!("{property_id}  empty book"),
    }
}
