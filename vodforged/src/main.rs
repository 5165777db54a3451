use clap::Parser;

#[tokio::main]
async fn main() {
    vodforged::init_tracing();
    let cli = vodforged::Cli::parse();
    if let Err(err) = vodforged::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
