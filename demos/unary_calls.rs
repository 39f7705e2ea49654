use std::error::Error;

use geyser_stream_sdk::stream::proto::CommitmentLevel;
use geyser_stream_sdk::{connect, GeyserClientOptions};
use secrecy::SecretString;

fn main() -> Result<(), Box<dyn Error>> {
    let endpoint = "https://REPLACE_WITH_GEYSER_ENDPOINT:443".to_string();
    let x_token = SecretString::new("REPLACE_WITH_X_TOKEN".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = connect(endpoint, Some(x_token), GeyserClientOptions::default()).await?;

        let pong = client.ping(1).await?;
        println!("pong count={}", pong.count);

        let slot = client.get_slot(Some(CommitmentLevel::Confirmed)).await?;
        println!("confirmed slot={}", slot.slot);

        let height = client.get_block_height(None).await?;
        println!("block height={}", height.block_height);

        let latest = client
            .get_latest_blockhash(Some(CommitmentLevel::Finalized))
            .await?;
        println!(
            "blockhash={} slot={} last_valid_block_height={}",
            latest.blockhash, latest.slot, latest.last_valid_block_height
        );

        let validity = client
            .is_blockhash_valid(latest.blockhash, Some(CommitmentLevel::Finalized))
            .await?;
        println!("blockhash valid={} at slot={}", validity.valid, validity.slot);

        let version = client.get_version().await?;
        println!("version={}", version.version);

        client.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
