use clap::Parser;
use fitkit_remote::{app, cli::Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = app::run(cli).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
