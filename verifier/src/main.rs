use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueHint};
use tracing::{error, info};

use verifier::config::Config;
use verifier::generator::{BlockGenerator, GeneratorOptions};
use verifier::genesis;
use verifier::learner::Learner;
use verifier::queue::TxQueue;
use verifier::rpc::{self, VerifierService};
use verifier::shards::{HttpShardClient, ShardClient, SHARD_COUNT};

#[derive(Parser)]
#[command(version, about = "Ethereum-compatible verifier node")]
struct Cli {
    /// Path to the verifier configuration file.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    config: PathBuf,
    /// The port the verifier RPC surface listens on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

fn init_tracing() {
    use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let (genesis_block, trie) =
        genesis::import(&config.genesis_block_path(), &config.genesis_data_path())
            .context("genesis import failed")?;
    let trie = trie.prune(config.prune_depth);
    info!(
        number = genesis_block.header.number,
        root = %trie.root(),
        "genesis verified"
    );

    if config.storage.len() != SHARD_COUNT {
        bail!("all {SHARD_COUNT} storage shards must be configured");
    }
    let timeout = Duration::from_millis(config.rpc.storage_timeout);
    let clients: Vec<Arc<HttpShardClient>> = config
        .storage
        .iter()
        .enumerate()
        .map(|(shard, hosts)| Arc::new(HttpShardClient::new(shard, hosts.clone())))
        .collect();
    futures::future::try_join_all(clients.iter().map(|client| client.probe(timeout)))
        .await
        .context("storage shards unreachable")?;
    info!("all {SHARD_COUNT} storage shards reachable");
    let shards: Vec<Arc<dyn ShardClient>> = clients
        .into_iter()
        .map(|client| client as Arc<dyn ShardClient>)
        .collect();

    let queue = Arc::new(TxQueue::new());
    let learner = Arc::new(Learner::new(genesis_block.header.number));
    let service = Arc::new(VerifierService::new(
        config.beneficiary()?,
        queue.clone(),
        learner.clone(),
    ));
    let port = cli.port;
    tokio::spawn(async move {
        if let Err(e) = rpc::serve(service, port).await {
            error!(error = %e, "RPC surface exited");
        }
    });

    let options = GeneratorOptions::from_config(&config)?;
    let generator = BlockGenerator::new(options, queue, learner, shards, &genesis_block, trie)?;
    generator.run().await
}
