#[tokio::main]
async fn main() {
    if let Err(e) = http_trace::app::run::main_with_error().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
