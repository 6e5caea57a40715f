use anyhow::Result;
use clap::{Parser, Subcommand};
use jobhunt_web::UserRegistry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobhunt-cli")]
#[command(about = "Job-hunt dashboard command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the dashboard web UI.
    Serve,
    /// Print the personal dashboard link for every configured user.
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("starting dashboard server");
            jobhunt_web::serve_from_env().await?;
        }
        Commands::Users => {
            let base_url = std::env::var("JOBHUNT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string());
            let registry = UserRegistry::from_yaml_file("users.yaml")?;
            for user in registry.all() {
                println!("{}: {}/?user={}", user.name, base_url, user.user_id);
            }
        }
    }
    Ok(())
}
