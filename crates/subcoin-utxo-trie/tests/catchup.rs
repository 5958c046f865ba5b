//! Catch-up loop against a synthetic chain, including reorganizations.

mod common;

use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, PubkeyHash};
use common::{outpoint, spend, test_config, MockChain};
use std::sync::Arc;
use std::time::Duration;
use subcoin_utxo_trie::{
    CatchupLoop, MemoryNodeStore, NodeHash, SyncState, UtxoTrieConfig, UtxoTrieMgr,
    UtxoTrieStatus,
};

fn catch_up(catchup: &mut CatchupLoop<MemoryNodeStore, Arc<MockChain>>) {
    while catchup.catchup().unwrap() {}
}

#[test]
fn test_catchup_follows_chain_and_reorg() {
    let chain = MockChain::new();
    let b1 = chain.mine(&[1, 2], vec![]);
    let b2 = chain.mine(&[3], vec![]);
    let b3 = chain.mine(
        &[4],
        vec![spend(&[outpoint(&b1.txdata[0], 1)], &[1, 5])],
    );
    let b4 = chain.mine(&[6], vec![]);
    let b5 = chain.mine(
        &[7],
        vec![spend(&[outpoint(&b2.txdata[0], 0)], &[8])],
    );

    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), test_config()).unwrap());
    assert_eq!(mgr.recover(&chain).unwrap(), chain.genesis_hash());

    let mut catchup = CatchupLoop::new(mgr.clone(), chain.clone());
    catch_up(&mut catchup);

    assert_eq!(mgr.last_added(), Some(b5.block_hash()));
    assert_eq!(mgr.sync_state(), SyncState::CatchingUp);
    assert_eq!(mgr.get_root_hash(None).unwrap(), chain.expected_root());
    assert_eq!(
        mgr.get_root_hash(Some(b5.block_hash())).unwrap(),
        chain.expected_root()
    );
    let root_at_b3 = mgr.get_root_hash(Some(b3.block_hash())).unwrap();
    assert!(!root_at_b3.is_zero());

    // Owner 1 holds its block 1 coinbase output and the change of the block 3 spend.
    let address = Address::p2pkh(PubkeyHash::from_byte_array([1; 20]), Network::Regtest);
    let mut unspent = mgr.get_unspent_for_address(&address).unwrap();
    unspent.sort();
    let mut expected = vec![outpoint(&b1.txdata[0], 0), outpoint(&b3.txdata[1], 0)];
    expected.sort();
    assert_eq!(unspent, expected);

    // Owner 3 was paid in block 2 and spent in block 5.
    assert!(mgr.get_unspent_for_account(&common::account(3)).unwrap().is_empty());

    // Audit queue keeps the first entries and drops the rest.
    let entries = mgr.audit_entries();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries.try_recv().unwrap().height, 1);

    // Replace blocks 4 and 5 with a longer fork.
    let fork4 = chain.add_block(b3.block_hash(), vec![common::coinbase(1_000, &[9])]);
    let fork5 = chain.add_block(
        fork4.block_hash(),
        vec![
            common::coinbase(1_001, &[10]),
            // Spent in the replaced block 5, unspent again on the fork.
            spend(&[outpoint(&b2.txdata[0], 0)], &[11]),
        ],
    );
    let fork6 = chain.add_block(fork5.block_hash(), vec![common::coinbase(1_002, &[12])]);
    chain.set_best(fork6.block_hash());

    catch_up(&mut catchup);

    assert_eq!(mgr.last_added(), Some(fork6.block_hash()));
    assert_eq!(mgr.get_root_hash(None).unwrap(), chain.expected_root());
    assert_eq!(mgr.get_root_hash(Some(b5.block_hash())).unwrap(), NodeHash::ZERO);
    assert_eq!(mgr.get_root_hash(Some(b3.block_hash())).unwrap(), root_at_b3);

    // Rolling back flushed the trie at the fork point.
    let status = mgr.status().unwrap().unwrap();
    assert!(status.is_consistent());

    mgr.flush().unwrap();
    assert_eq!(
        mgr.status().unwrap(),
        Some(UtxoTrieStatus::consistent(fork6.block_hash()))
    );
    let report = mgr.with_trie(|trie| trie.verify_store()).unwrap();
    assert!(report.is_ok(), "{:?}", report.issues);
    assert_eq!(report.leaves, chain.utxo_keys().len());
}

#[test]
fn test_catchup_flushes_by_height() {
    let chain = MockChain::new();
    for owner in 1..=6 {
        chain.mine(&[owner], vec![]);
    }

    let mut config = test_config();
    config.flush_policy.base_interval = 4;
    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), config).unwrap());
    mgr.recover(&chain).unwrap();

    let mut catchup = CatchupLoop::new(mgr.clone(), chain.clone());
    catch_up(&mut catchup);

    assert_eq!(
        mgr.status().unwrap(),
        Some(UtxoTrieStatus::consistent(chain.hash_at(4)))
    );
    assert_eq!(mgr.last_added(), Some(chain.tip()));
}

#[test]
fn test_background_loop_notifies_waiters() {
    let chain = MockChain::new();
    chain.mine(&[1], vec![]);
    let b2 = chain.mine(&[2], vec![]);

    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), test_config()).unwrap());
    let handle = mgr.start(chain.clone()).unwrap().expect("Trie is enabled");
    assert!(mgr.start(chain.clone()).unwrap().is_none());

    assert!(mgr.notify_block(Some(b2.block_hash())));

    let b3 = chain.mine(&[3], vec![spend(&[outpoint(&b2.txdata[0], 0)], &[4])]);
    assert!(mgr.notify_block(Some(b3.block_hash())));
    assert_eq!(
        mgr.get_root_hash(Some(b3.block_hash())).unwrap(),
        chain.expected_root()
    );

    // Space pressure pauses the loop, new blocks are not applied.
    chain.set_space_limited(true);
    let b4 = chain.mine(&[5], vec![]);
    mgr.notify_block(None);
    std::thread::sleep(Duration::from_millis(100));
    assert!(mgr.get_root_hash(Some(b4.block_hash())).unwrap().is_zero());
    chain.set_space_limited(false);
    assert!(mgr.notify_block(Some(b4.block_hash())));

    mgr.stop();
    handle.join().unwrap();

    assert_eq!(
        mgr.status().unwrap(),
        Some(UtxoTrieStatus::consistent(b4.block_hash()))
    );
}

#[test]
fn test_disabled_trie_never_starts() {
    let chain = MockChain::new();
    let config = UtxoTrieConfig {
        enabled: false,
        ..test_config()
    };
    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), config).unwrap());

    assert!(mgr.start(chain.clone()).unwrap().is_none());
    assert_eq!(mgr.get_root_hash(Some(chain.tip())).unwrap(), NodeHash::ZERO);
    assert!(!mgr.is_up_to_date());
}

#[test]
fn test_missing_block_is_retried() {
    let chain = MockChain::new();
    for owner in 1..=3 {
        chain.mine(&[owner], vec![]);
    }
    chain.withhold(2);

    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), test_config()).unwrap());
    mgr.recover(&chain).unwrap();
    let mut catchup = CatchupLoop::new(mgr.clone(), chain.clone());

    assert!(catchup.catchup().unwrap());
    assert_eq!(mgr.last_added(), Some(chain.hash_at(1)));
    assert!(catchup.catchup().unwrap());
    assert_eq!(mgr.last_added(), Some(chain.hash_at(1)));

    chain.serve_best_chain();
    catch_up(&mut catchup);

    assert_eq!(mgr.last_added(), Some(chain.tip()));
    assert_eq!(mgr.get_root_hash(None).unwrap(), chain.expected_root());
}

#[test]
fn test_block_with_unexpected_parent_is_retried() {
    let chain = MockChain::new();
    let b1 = chain.mine(&[1], vec![]);
    let b2 = chain.mine(&[2], vec![]);

    // A block at height 1 reported at height 2, its parent is not the applied tip.
    let stray = chain.add_block(chain.genesis_hash(), vec![common::coinbase(500, &[9])]);
    chain.serve_at(2, stray.block_hash());

    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), test_config()).unwrap());
    mgr.recover(&chain).unwrap();
    let mut catchup = CatchupLoop::new(mgr.clone(), chain.clone());

    assert!(catchup.catchup().unwrap());
    assert_eq!(mgr.last_added(), Some(b1.block_hash()));
    assert!(mgr.get_root_hash(Some(stray.block_hash())).unwrap().is_zero());

    chain.serve_best_chain();
    catch_up(&mut catchup);

    assert_eq!(mgr.last_added(), Some(b2.block_hash()));
    assert_eq!(mgr.get_root_hash(None).unwrap(), chain.expected_root());
}

#[test]
fn test_catchup_flushes_after_max_interval() {
    let chain = MockChain::new();
    for owner in 1..=3 {
        chain.mine(&[owner], vec![]);
    }

    // No height triggers a flush below the base interval.
    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), test_config()).unwrap());
    mgr.recover(&chain).unwrap();
    catch_up(&mut CatchupLoop::new(mgr.clone(), chain.clone()));
    assert_eq!(mgr.last_added(), Some(chain.tip()));
    assert_eq!(
        mgr.status().unwrap(),
        Some(UtxoTrieStatus::consistent(chain.genesis_hash()))
    );

    let mut config = test_config();
    config.flush_policy.max_interval = Duration::ZERO;
    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), config).unwrap());
    mgr.recover(&chain).unwrap();
    catch_up(&mut CatchupLoop::new(mgr.clone(), chain.clone()));

    assert_eq!(
        mgr.status().unwrap(),
        Some(UtxoTrieStatus::consistent(chain.tip()))
    );
}

#[test]
fn test_stop_does_not_report_caught_up() {
    let chain = MockChain::new();
    chain.mine(&[1], vec![]);

    let config = UtxoTrieConfig {
        new_block_timeout: Duration::from_secs(30),
        ..test_config()
    };
    let mgr = Arc::new(UtxoTrieMgr::new(MemoryNodeStore::new(), config).unwrap());

    // Keep the pass busy so the stop request arrives in the middle of it.
    chain.set_space_limited(true);
    let started = std::time::Instant::now();
    let handle = mgr.start(chain.clone()).unwrap().expect("Trie is enabled");
    std::thread::sleep(Duration::from_millis(50));
    mgr.stop();
    handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_ne!(mgr.sync_state(), SyncState::CaughtUp);
}
