// CLI modules
mod cli;

use cli::args::{Args, Parser};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    webfs::spawn_service(&config).await;
}
