//! Shared test helpers for `blockscope-core` unit tests.
//!
//! Builders for node-side raw transactions and index-side records, so tests
//! across modules share one source of dummy data.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Txid};

use crate::rpc::{RawInput, RawOutput, RawTransaction};
use crate::types::{Address, AddressTxRef, BlockHeight, Transaction, TxIo, UnspentOutput};

// ==============================================================================
// Txid / Address Helpers
// ==============================================================================

/// Create a deterministic `Txid` from a single distinguishing byte.
pub fn txid_from_byte(b: u8) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    Txid::from_byte_array(bytes)
}

/// P2WPKH scriptPubKey whose 20-byte program is `tag` repeated.
pub fn p2wpkh_script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    ScriptBuf::from_bytes(bytes)
}

/// The regtest address paying to [`p2wpkh_script`]`(tag)`.
pub fn regtest_address(tag: u8) -> String {
    bitcoin::Address::from_script(&p2wpkh_script(tag), Network::Regtest)
        .expect("p2wpkh script always has an address")
        .to_string()
}

// ==============================================================================
// Node-side Builders
// ==============================================================================

/// A confirmed raw transaction at height 100. Override fields after
/// construction when needed.
pub fn raw_tx(txid: Txid, inputs: Vec<RawInput>, outputs: Vec<RawOutput>) -> RawTransaction {
    RawTransaction {
        txid,
        block_hash: None,
        block_height: Some(BlockHeight(100)),
        block_time: Some(1_700_000_000),
        confirmations: Some(1),
        inputs,
        outputs,
    }
}

pub fn coinbase_input() -> RawInput {
    RawInput {
        prevout: None,
        value: None,
        script_pub_key: None,
    }
}

/// A spending input referencing `funding_txid:vout`, without inline prevout.
pub fn spending_input(funding_txid: Txid, vout: u32) -> RawInput {
    RawInput {
        prevout: Some(OutPoint::new(funding_txid, vout)),
        value: None,
        script_pub_key: None,
    }
}

pub fn p2wpkh_output(sats: u64, tag: u8) -> RawOutput {
    RawOutput {
        value: Amount::from_sat(sats),
        script_pub_key: p2wpkh_script(tag),
    }
}

// ==============================================================================
// Index-side Builders
// ==============================================================================

pub fn address_record(a_id: &str, received: i64, sent: i64, txids: &[&str]) -> Address {
    Address {
        a_id: a_id.to_owned(),
        sent,
        received,
        balance: received - sent,
        txs: txids
            .iter()
            .map(|txid| AddressTxRef {
                txid: (*txid).to_owned(),
                direction: None,
            })
            .collect(),
        unspent: Vec::new(),
    }
}

pub fn unspent(txid: &str, index: u32, amount: u64, height: Option<u32>) -> UnspentOutput {
    UnspentOutput {
        txid: txid.to_owned(),
        index,
        script: hex_script(&p2wpkh_script(1)),
        amount,
        height: height.map(BlockHeight),
    }
}

pub fn indexed_tx(txid: &str, height: Option<u32>, timestamp: u64, total: u64) -> Transaction {
    Transaction {
        txid: txid.to_owned(),
        blockindex: height.map(BlockHeight),
        timestamp,
        total,
        vin: vec![TxIo {
            addresses: "coinbase".to_owned(),
            amount: total,
        }],
        vout: vec![TxIo {
            addresses: regtest_address(1),
            amount: total,
        }],
    }
}

/// 64-char lowercase hex txid string built from one byte.
pub fn hex_txid(b: u8) -> String {
    txid_from_byte(b).to_string()
}

fn hex_script(script: &ScriptBuf) -> String {
    script.to_hex_string()
}
