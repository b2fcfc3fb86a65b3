use depthbook::EngineConfig;
use depthbook::binance::Book;
use depthbook::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();

    let symbol = std::env::args().nth(1).unwrap_or_else(|| "BTCUSDT".to_string());
    let mut book = Book::new_spot(&symbol, EngineConfig::from_env()).await?;

    let mut views = book.subscribe();
    let mut status = book.watch_status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let (Some(bid), Some(ask)) = (view.best_bid(), view.best_ask()) else {
                    continue;
                };
                println!(
                    "{} #{} bid {} x {} | ask {} x {} | mid {}",
                    book.symbol(),
                    view.last_update_id,
                    bid.price,
                    bid.quantity,
                    ask.price,
                    ask.quantity,
                    view.mid_price.map(|m| m.to_string()).unwrap_or_default(),
                );
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match current.error {
                    Some(e) if e.is_terminal() => {
                        eprintln!("{:?}: {}", current.state, e);
                        break;
                    }
                    Some(e) => eprintln!("{:?}: {}", current.state, e),
                    None => eprintln!("{:?}", current.state),
                }
            }
        }
    }

    book.dispose().await;
    Ok(())
}
