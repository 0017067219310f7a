//! Storage tests: the flat-file layout and recovery on restart.

use crate::generators::witness_peer;
use crate::harness::TestNode;
use bitnode_consensus::{Block, ChainParams, HEADER_SIZE};
use bitnode_storage::{BlockIndexRecord, ChainStore, RECORD_SIZE};
use bitnode_sync::SyncState;
use std::fs::{self, OpenOptions};
use std::io::Write;

fn synced_node(headers: usize, blocks: usize) -> TestNode {
    let node = TestNode::new(headers);
    let peer = witness_peer();
    node.sync_headers(&peer);
    node.chain.request_blocks(&peer);
    for height in 1..=blocks {
        node.chain.process_block(node.block(height), &peer).unwrap();
    }
    assert_eq!(node.chain.height(), blocks as u32);
    node
}

#[test]
fn test_header_log_layout() {
    let node = synced_node(5, 0);
    let log = fs::read(node.path().join("headers.dat")).unwrap();

    assert_eq!(log.len(), 6 * HEADER_SIZE);
    let genesis = ChainParams::regtest().genesis;
    assert_eq!(&log[..HEADER_SIZE], &genesis.to_bytes()[..]);
    for (i, header) in node.headers.iter().enumerate() {
        let at = (i + 1) * HEADER_SIZE;
        assert_eq!(&log[at..at + HEADER_SIZE], &header.to_bytes()[..]);
    }
}

#[test]
fn test_block_index_layout() {
    let node = synced_node(3, 3);
    let raw = fs::read(node.path().join("blockinfo.dat")).unwrap();
    assert_eq!(raw.len(), 4 * RECORD_SIZE);

    let records = node.store.block_index_records().unwrap();
    assert_eq!(records[0].hash, ChainParams::regtest().genesis_hash());
    for (height, record) in records.iter().enumerate() {
        assert_eq!(record.height as usize, height);
        let stored = node.store.read_block(&record.hash).unwrap().unwrap();
        assert_eq!(stored.len(), record.size as usize);
    }

    let last = BlockIndexRecord::from_bytes(&raw[3 * RECORD_SIZE..]).unwrap();
    assert_eq!(last.hash, node.headers[2].hash());
    assert_eq!(last.size as usize, node.block(3).serialized_size());
}

#[test]
fn test_stored_block_bytes_round_trip() {
    let node = synced_node(2, 2);
    let block = node.block(2);
    let stored = node.store.read_block(&block.hash()).unwrap().unwrap();
    assert_eq!(stored, block.to_bytes());
    assert_eq!(&stored[..HEADER_SIZE], &block.header.to_bytes()[..]);
}

#[test]
fn test_restart_restores_heights() {
    let node = synced_node(6, 4);
    let node = node.restart();

    assert_eq!(node.chain.header_count(), 7);
    assert_eq!(node.chain.height(), 4);
    assert_eq!(node.chain.tip(), node.headers[3].hash());
    assert_eq!(node.chain.state(), SyncState::None);
}

#[test]
fn test_restart_resumes_block_sync() {
    let node = synced_node(6, 2).restart();
    let peer = witness_peer();
    node.chain.set_state(SyncState::BlocksSync);

    assert_eq!(node.chain.request_blocks(&peer), 4);
    for height in 3..=6 {
        node.chain.process_block(node.block(height), &peer).unwrap();
    }
    assert_eq!(node.chain.height(), 6);
}

#[test]
fn test_torn_header_log_resets_to_genesis() {
    let node = synced_node(4, 2);
    let mut file = OpenOptions::new()
        .append(true)
        .open(node.path().join("headers.dat"))
        .unwrap();
    file.write_all(&[0xde, 0xad]).unwrap();
    drop(file);

    let node = node.restart();

    assert_eq!(node.chain.header_count(), 1);
    assert_eq!(
        fs::read(node.path().join("headers.dat")).unwrap().len(),
        HEADER_SIZE
    );
    // The index points past the only header left, so it starts over too
    assert_eq!(node.chain.height(), 0);
    assert_eq!(
        fs::read(node.path().join("blockinfo.dat")).unwrap().len(),
        RECORD_SIZE
    );
}

#[test]
fn test_torn_block_index_resets_to_genesis() {
    let node = synced_node(4, 3);
    let mut file = OpenOptions::new()
        .append(true)
        .open(node.path().join("blockinfo.dat"))
        .unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);

    let node = node.restart();

    assert_eq!(node.chain.header_count(), 5);
    assert_eq!(node.chain.height(), 0);
    let records = node.store.block_index_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hash, ChainParams::regtest().genesis_hash());
}

#[test]
fn test_genesis_block_file_matches_params() {
    let node = TestNode::new(0);
    let genesis: Block = ChainParams::regtest().genesis_block();

    let stored = node.store.read_block(&genesis.hash()).unwrap().unwrap();
    assert_eq!(stored, genesis.to_bytes());
}
