//! Scenario P (peer sync): a node dialing a taller peer catches up to its
//! tip through a real `version` → `getblocks` → `inv` → `getdata`/`block`
//! round trip, not just a local chain swap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sole_chain::{Chain, UtxoIndex};
use sole_consensus::{ConsensusParams, GenesisParams};
use sole_core::Transaction;
use sole_crypto::{generate_keypair, hash_pub_key, public_key_raw, public_key_uncompressed, Address};
use sole_mempool::Mempool;
use sole_network::{Host, NetworkConfig};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn scenario_p_peer_sync() {
    let (admin_key, admin_verifying) = generate_keypair();
    let admin_pubkey = public_key_raw(&admin_verifying);
    let admin_hash = hash_pub_key(&admin_pubkey);
    let admin_address = Address::from_pubkey_hash(admin_hash).encode();
    let validator_hex = hex::encode(public_key_uncompressed(&admin_verifying));

    let params = ConsensusParams {
        target_zeros: 1,
        drift_tolerance_secs: 60,
        authorized_validators: vec![validator_hex],
        genesis: GenesisParams {
            timestamp: 1_768_947_120,
            reward: 5_000_000 * 100_000_000,
            admin_address,
            memo: "scenario-p".to_string(),
        },
    };

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let chain_a = Arc::new(Chain::init(dir_a.path(), params.clone()).unwrap());
    let chain_b = Arc::new(Chain::init(dir_b.path(), params).unwrap());
    assert_eq!(chain_a.block_hashes().unwrap(), chain_b.block_hashes().unwrap());

    let index_a = UtxoIndex::new(&chain_a);
    index_a.reindex().unwrap();

    let mut prev_tx = chain_a.get_block(&chain_a.block_hashes().unwrap()[0]).unwrap().transactions[0].clone();
    let mut prev_vout = 0i32;
    let mut prev_value = prev_tx.vout[0].value;

    for i in 0..10i64 {
        let amount = 1_000 + i;
        let spendable = vec![(prev_tx.id, prev_vout, prev_value)];
        let mut prev_txs = HashMap::new();
        prev_txs.insert(prev_tx.id, prev_tx.clone());

        let mut transfer =
            Transaction::new_transfer(&admin_pubkey, admin_hash, admin_hash, amount, &spendable).unwrap();
        transfer.sign(&admin_key, &prev_txs).unwrap();

        let block = chain_a.forge(vec![transfer.clone()], &admin_key).unwrap();
        index_a.update(&block).unwrap();

        // Carry forward the larger remaining-balance output (the change),
        // not the fixed-size "amount" output, so later rounds still have
        // funds to draw from.
        let (max_vout, max_output) = transfer
            .vout
            .iter()
            .enumerate()
            .max_by_key(|(_, o)| o.value)
            .unwrap();
        prev_value = max_output.value;
        prev_vout = max_vout as i32;
        prev_tx = transfer;
    }
    assert_eq!(chain_a.tip_height().unwrap(), 10);

    let identity_dir_a = tempfile::tempdir().unwrap();
    let addr_a: std::net::SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
    let host_a = Host::new(
        NetworkConfig {
            listen_addr: addr_a,
            bootstrap_peers: Vec::new(),
            identity_path: identity_dir_a.path().join("identity.key"),
            protocol_version: 1,
        },
        chain_a.clone(),
        Arc::new(Mempool::new()),
    )
    .unwrap();
    let serve_handle = tokio::spawn(host_a.clone().serve());

    let identity_dir_b = tempfile::tempdir().unwrap();
    let host_b = Host::new(
        NetworkConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            bootstrap_peers: vec![addr_a],
            identity_path: identity_dir_b.path().join("identity.key"),
            protocol_version: 1,
        },
        chain_b.clone(),
        Arc::new(Mempool::new()),
    )
    .unwrap();

    host_b.dial_bootstrap_peers().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    serve_handle.abort();

    assert_eq!(chain_b.tip_height().unwrap(), 10);
    assert_eq!(chain_a.block_hashes().unwrap(), chain_b.block_hashes().unwrap());

    let index_b = UtxoIndex::new(&chain_b);
    index_b.reindex().unwrap();
    let (balance_a, _) = index_a.find_spendable_outputs(&admin_hash, i64::MAX).unwrap();
    let (balance_b, _) = index_b.find_spendable_outputs(&admin_hash, i64::MAX).unwrap();
    assert_eq!(balance_a, balance_b);
}
