#[tokio::main]
async fn main() {
    if let Err(err) = bid_comparison_lib::run().await {
        eprintln!("bid-comparison: {}", err);
        std::process::exit(1);
    }
}
