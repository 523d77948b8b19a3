//! Follows a deployed PRXTokenChain contract and prints the view as it changes.
//!
//! ```text
//! PRX_RPC_URL=http://127.0.0.1:8545 PRX_CONTRACT=0x5FbDB2315678afecb367f032d93F642f64180aa3 \
//!     cargo run --example watch
//! ```

use std::env;
use std::sync::Arc;

use prx_chainview::logging::init_tracing;
use prx_chainview::utils::parse_address;
use prx_chainview::{ChainView, JsonFileStore, RpcWalletProvider, SyncConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,prx_chainview=debug")?;

    let rpc_url = env::var("PRX_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
    let mut config = SyncConfig::development(rpc_url);
    if let Ok(address) = env::var("PRX_CONTRACT") {
        config.contract_address = Some(
            parse_address(&address).ok_or_else(|| anyhow::anyhow!("PRX_CONTRACT is not an address: {}", address))?,
        );
    }

    let local = Arc::new(JsonFileStore::open(".prx-chainview.json")?);
    let wallet = Arc::new(RpcWalletProvider::new(
        &config.rpc_url,
        config.rpc_timeout,
        config.wallet_poll_interval,
    )?);

    let cancel = CancellationToken::new();
    let watcher = Arc::clone(&wallet).spawn_watcher(cancel.clone());

    let view = Arc::new(ChainView::open(config, local, wallet).await?);
    info!(contract = ?view.contract_address(), "Bound to contract");

    if view.restore_session().await?.is_none() {
        if let Err(e) = view.connect_wallet().await {
            error!(error = %e, "Continuing without a wallet");
        }
    }
    view.initial_sync().await?;

    let mut handles = view.spawn_background(cancel.clone());
    handles.push(watcher);

    let mut snapshots = view.subscribe();
    loop {
        {
            let snapshot = snapshots.borrow_and_update().clone();
            println!(
                "v{} | blocks {} | supply {} | proposals {}",
                snapshot.version, snapshot.block_count, snapshot.total_supply, snapshot.proposal_count
            );
            for activity in snapshot.recent_activity() {
                println!("  {}", activity);
            }
            if let Some(account) = &snapshot.account {
                println!(
                    "  {} holds {} tokens, {} ETH",
                    account.checksummed(),
                    snapshot.owned_tokens.len(),
                    account.balance
                );
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
