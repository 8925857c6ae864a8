use std::sync::Arc;

use visa_console::accounts::AccountDirectory;
use visa_console::api::{AccountsApi, ApiClient, HttpAccountsApi, HttpVisaApi, VisaApi};
use visa_console::config::ConsoleConfig;
use visa_console::console::{self, Console};
use visa_console::flow::{Countdown, FlowController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ConsoleConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export VISA_CONSOLE_API_URL=http://localhost:3000");
        std::process::exit(1);
    });

    let client = ApiClient::new(&config)?;

    eprintln!("🛂 Visa Console v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", client.base_url());
    eprintln!(
        "   OTP window: {}",
        Countdown::start(config.otp_window).display()
    );
    eprintln!("   Type 'help' for commands. 'quit' to exit.\n");

    let visa_api: Arc<dyn VisaApi> = Arc::new(HttpVisaApi::new(client.clone()));
    let accounts_api: Arc<dyn AccountsApi> = Arc::new(HttpAccountsApi::new(client));

    let flow = Arc::new(FlowController::new(visa_api, config));
    let accounts = Arc::new(AccountDirectory::new(accounts_api));

    match accounts.refresh().await {
        Ok(count) => tracing::info!(count, "Loaded accounts"),
        Err(e) => tracing::warn!(error = %e, "Could not load accounts; continuing"),
    }

    Console::new(flow, accounts)
        .run(console::stdin_lines())
        .await;

    Ok(())
}
