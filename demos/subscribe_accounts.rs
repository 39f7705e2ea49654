use std::error::Error;

use futures_util::StreamExt;
use geyser_stream_sdk::stream::proto::{ping_request, update_kind, UpdateOneof};
use geyser_stream_sdk::{connect, GeyserClientOptions};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let endpoint = "https://REPLACE_WITH_GEYSER_ENDPOINT:443".to_string();
    let x_token = SecretString::new("REPLACE_WITH_X_TOKEN".to_string());
    let accounts = vec![
        "REPLACE_WITH_ACCOUNT_PUBKEY_1".to_string(),
        "REPLACE_WITH_ACCOUNT_PUBKEY_2".to_string(),
    ];

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = connect(endpoint, Some(x_token), GeyserClientOptions::default()).await?;
        client.update_subscription(accounts)?;

        let (sender, mut updates) = client.subscribe();
        while let Some(update) = updates.next().await {
            match &update.update_oneof {
                Some(UpdateOneof::Ping(_)) => sender.send(ping_request(1))?,
                Some(UpdateOneof::Account(account)) => {
                    println!("account update slot={} filters={:?}", account.slot, update.filters);
                }
                _ => println!("update kind={}", update_kind(&update)),
            }
        }

        client.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
