use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};

use crate::error::{CoreError, RpcError};
use crate::rpc::types::{ChainInfo, RawInput, RawOutput, TxOutSetInfo};
use crate::types::{BlockHeight, PeerInfo};

fn invalid(message: impl Into<String>) -> CoreError {
    RpcError::InvalidResponse(message.into()).into()
}

pub(super) fn parse_txid(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Txid, CoreError> {
    let value = value
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| invalid(format!("missing {field}")))?;
    value
        .parse()
        .map_err(|e| invalid(format!("invalid {field}: {e}")))
}

pub(super) fn parse_opt_block_hash(
    value: Option<&serde_json::Value>,
) -> Result<Option<BlockHash>, CoreError> {
    match value.and_then(serde_json::Value::as_str) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| invalid(format!("invalid blockhash: {e}"))),
    }
}

pub(super) fn parse_integer_required<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, true>(value, field)?
        .ok_or_else(|| invalid(format!("missing {field}")))
}

pub(super) fn parse_integer_optional<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
) -> Option<T>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, false>(value, "value")
        .ok()
        .flatten()
}

// `REQUIRED=false` treats missing/null/type-mismatch as `Ok(None)`.
fn parse_integer<T, const SIGNED: bool, const REQUIRED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<T>, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let missing_or_none = || {
        if REQUIRED {
            Err(invalid(format!("missing {field}")))
        } else {
            Ok(None)
        }
    };

    let Some(value) = value else {
        return missing_or_none();
    };

    if SIGNED {
        let Some(n) = value.as_i64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| invalid(format!("{field} out of range: {n}")))
    } else {
        let Some(n) = value.as_u64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| invalid(format!("{field} out of range: {n}")))
    }
}

// ==============================================================================
// Transactions
// ==============================================================================

pub(super) fn parse_vin(vin: &[serde_json::Value]) -> Result<Vec<RawInput>, CoreError> {
    vin.iter()
        .map(|input| {
            let prevout = if input.get("coinbase").is_some() {
                None
            } else {
                let prev_txid = parse_txid(input.get("txid"), "vin.txid")?;
                let prev_vout =
                    parse_integer_required::<u32, false>(input.get("vout"), "vin.vout")?;
                Some(OutPoint::new(prev_txid, prev_vout))
            };

            // Only present at verbosity 2 or on nodes with -txindex prevout support.
            let prevout_json = input.get("prevout");
            let value = prevout_json
                .and_then(|p| p.get("value"))
                .and_then(|v| parse_btc_amount(v).ok());
            let script_pub_key = prevout_json
                .and_then(|p| p.get("scriptPubKey"))
                .and_then(|s| s.get("hex"))
                .and_then(serde_json::Value::as_str)
                .and_then(|hex_str| script_from_hex(hex_str).ok());

            Ok(RawInput {
                prevout,
                value,
                script_pub_key,
            })
        })
        .collect()
}

pub(super) fn parse_vout(vout: &[serde_json::Value]) -> Result<Vec<RawOutput>, CoreError> {
    vout.iter()
        .map(|output| {
            let value = parse_btc_amount(
                output
                    .get("value")
                    .ok_or_else(|| invalid("missing value in vout"))?,
            )?;
            let script_pub_key = parse_script_pubkey_from_json(
                output
                    .get("scriptPubKey")
                    .ok_or_else(|| invalid("missing scriptPubKey in vout"))?,
            )?;

            Ok(RawOutput {
                value,
                script_pub_key,
            })
        })
        .collect()
}

fn parse_script_pubkey_from_json(spk: &serde_json::Value) -> Result<ScriptBuf, CoreError> {
    let hex_str = spk
        .get("hex")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| invalid("missing hex in scriptPubKey"))?;
    script_from_hex(hex_str)
}

fn script_from_hex(hex_str: &str) -> Result<ScriptBuf, CoreError> {
    ScriptBuf::from_hex(hex_str).map_err(|e| invalid(format!("invalid scriptPubKey hex: {e}")))
}

/// Parse a coin amount from a JSON value.
///
/// Number values are parsed via `Amount::from_float_in` to support scientific
/// notation, while string values are parsed via `Amount::from_str_in`.
pub(super) fn parse_btc_amount(value: &serde_json::Value) -> Result<Amount, CoreError> {
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n
                .as_f64()
                .ok_or_else(|| invalid(format!("invalid amount `{value}`")))?;
            Amount::from_float_in(parsed, bitcoin::Denomination::Bitcoin)
                .map_err(|e| invalid(format!("invalid amount `{value}`: {e}")))
        }
        serde_json::Value::String(s) => Amount::from_str_in(s, bitcoin::Denomination::Bitcoin)
            .map_err(|e| invalid(format!("invalid amount `{s}`: {e}"))),
        _ => Err(invalid(format!("expected numeric amount, got: {value}"))),
    }
}

// ==============================================================================
// Node Status
// ==============================================================================

pub(super) fn parse_chain_info(
    raw: serde_json::Value,
    connections: Option<u32>,
) -> Result<ChainInfo, CoreError> {
    let mut info: ChainInfo = serde_json::from_value(raw)
        .map_err(|e| invalid(format!("invalid getblockchaininfo result: {e}")))?;
    info.connections = connections.or(info.connections);
    Ok(info)
}

pub(super) fn parse_tx_out_set_info(raw: &serde_json::Value) -> Result<TxOutSetInfo, CoreError> {
    let height = parse_integer_required::<u32, false>(raw.get("height"), "height")?;
    let txouts = parse_integer_required::<u64, false>(raw.get("txouts"), "txouts")?;
    let total_amount = parse_btc_amount(
        raw.get("total_amount")
            .ok_or_else(|| invalid("missing total_amount"))?,
    )?;
    Ok(TxOutSetInfo {
        height: BlockHeight(height),
        txouts,
        total_amount,
    })
}

/// `estimatesmartfee` reports `feerate` only when it has enough data;
/// otherwise it carries an `errors` array instead.
pub(super) fn parse_fee_estimate(raw: &serde_json::Value) -> Result<Option<f64>, CoreError> {
    if !raw.is_object() {
        return Err(invalid(format!("invalid estimatesmartfee result: {raw}")));
    }
    Ok(raw
        .get("feerate")
        .and_then(serde_json::Value::as_f64)
        .filter(|rate| *rate >= 0.0))
}

pub(super) fn parse_peer_info(raw: &serde_json::Value) -> Result<Vec<PeerInfo>, CoreError> {
    let peers = raw
        .as_array()
        .ok_or_else(|| invalid("getpeerinfo result must be an array"))?;

    Ok(peers
        .iter()
        .filter_map(|peer| {
            let addr = peer.get("addr").and_then(serde_json::Value::as_str)?;
            let protocol = parse_integer_optional::<u32, false>(peer.get("version"));
            let version = peer
                .get("subver")
                .and_then(serde_json::Value::as_str)
                .map(clean_subversion)
                .unwrap_or_default();
            Some(PeerInfo {
                address: strip_port(addr).to_owned(),
                protocol,
                version,
                country: None,
            })
        })
        .collect())
}

/// `1.2.3.4:8333` → `1.2.3.4`, `[::1]:8333` → `::1`.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => addr,
    }
}

/// `/Satoshi:27.0.0/` → `27.0.0`.
fn clean_subversion(subver: &str) -> String {
    let trimmed = subver.trim_matches('/');
    trimmed
        .split_once(':')
        .map_or(trimmed, |(_, version)| version)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;

    use super::*;

    #[test]
    fn parse_btc_amount_integer() {
        let val = serde_json::json!(1);
        let amount = parse_btc_amount(&val).expect("should parse integer");
        assert_eq!(amount, Amount::from_btc(1.0).expect("valid"));
    }

    #[test]
    fn parse_btc_amount_fractional() {
        let val = serde_json::json!(0.00001);
        let amount = parse_btc_amount(&val).expect("should parse fractional");
        assert_eq!(amount, Amount::from_sat(1000));
    }

    #[test]
    fn parse_btc_amount_string() {
        let val = serde_json::json!("0.5");
        let amount = parse_btc_amount(&val).expect("should parse string");
        assert_eq!(amount, Amount::from_btc(0.5).expect("valid"));
    }

    #[test]
    fn parse_btc_amount_invalid() {
        assert!(parse_btc_amount(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn parse_btc_amount_scientific_number() {
        let val = serde_json::json!(6.6e-6);
        let amount = parse_btc_amount(&val).expect("should parse scientific notation");
        assert_eq!(amount, Amount::from_sat(660));
    }

    #[test]
    fn coinbase_input_has_no_prevout() {
        let vin = vec![serde_json::json!({ "coinbase": "03a0bb0d", "sequence": 4294967295u32 })];
        let inputs = parse_vin(&vin).expect("coinbase vin parses");
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].prevout.is_none());
        assert!(inputs[0].value.is_none());
    }

    #[test]
    fn spending_input_keeps_inline_prevout_value() {
        let vin = vec![serde_json::json!({
            "txid": "11".repeat(32),
            "vout": 3,
            "prevout": {
                "value": 0.25,
                "scriptPubKey": { "hex": "0014".to_owned() + &"ab".repeat(20) }
            }
        })];
        let inputs = parse_vin(&vin).expect("vin parses");
        let prevout = inputs[0].prevout.expect("prevout present");
        assert_eq!(prevout.vout, 3);
        assert_eq!(inputs[0].value, Some(Amount::from_sat(25_000_000)));
        assert!(inputs[0].script_pub_key.is_some());
    }

    #[test]
    fn vout_without_script_is_rejected() {
        let vout = vec![serde_json::json!({ "value": 1.0 })];
        assert!(parse_vout(&vout).is_err());
    }

    #[test]
    fn fee_estimate_without_feerate_is_none() {
        let raw = serde_json::json!({ "errors": ["Insufficient data"], "blocks": 2 });
        assert_eq!(parse_fee_estimate(&raw).expect("object parses"), None);

        let raw = serde_json::json!({ "feerate": 0.00012, "blocks": 2 });
        assert_eq!(parse_fee_estimate(&raw).expect("object parses"), Some(0.00012));
    }

    #[test]
    fn tx_out_set_info_parses_total_amount() {
        let raw = serde_json::json!({
            "height": 120,
            "txouts": 480,
            "total_amount": 6000.5
        });
        let info = parse_tx_out_set_info(&raw).expect("parses");
        assert_eq!(info.height, BlockHeight(120));
        assert_eq!(info.txouts, 480);
        assert_eq!(info.total_amount, Amount::from_sat(600_050_000_000));
    }

    #[test]
    fn peer_info_strips_port_and_agent_name() {
        let raw = serde_json::json!([
            { "addr": "10.0.0.7:8333", "version": 70016, "subver": "/Satoshi:27.0.0/" },
            { "addr": "[2001:db8::1]:8333", "version": 70015, "subver": "/Satoshi:26.1.0/" },
            { "version": 70015 }
        ]);
        let peers = parse_peer_info(&raw).expect("array parses");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].address, "10.0.0.7");
        assert_eq!(peers[0].protocol, Some(70016));
        assert_eq!(peers[0].version, "27.0.0");
        assert_eq!(peers[1].address, "2001:db8::1");
    }

    #[test]
    fn chain_info_takes_separate_connection_count() {
        let raw = serde_json::json!({
            "chain": "regtest",
            "blocks": 101,
            "bestblockhash": "00".repeat(32),
            "difficulty": 4.6e-10,
            "pruned": false
        });
        let info = parse_chain_info(raw, Some(8)).expect("parses");
        assert_eq!(info.chain, "regtest");
        assert_eq!(info.blocks, 101);
        assert_eq!(info.connections, Some(8));
    }
}
