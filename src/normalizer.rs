//! Canonical, serialization-safe event payloads.
//!
//! Raw logs are decoded against their configured [`EventDescriptor`] and converted into
//! [`CanonicalEvent`]s. Argument values are normalized so nothing in the payload depends on a
//! non-serializable numeric type: big integers become decimal strings, byte blobs become
//! `0x`-prefixed hex, arrays are converted element-wise, and tuples become key/value maps
//! named after their ABI components.

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    hex,
    json_abi::Param,
    rpc::types::Log,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{config::EventDescriptor, error::RelayError};

/// The normalized representation of a single emitted event.
///
/// `(block_number, log_index)` is unique per source contract under non-reorg operation and is
/// the ordering key used by the backfill scanner. The downstream consumer is expected to be
/// idempotent over `(transaction_hash, log_index, event_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub event_name: String,
    /// Argument name to normalized value, in ABI declaration order.
    pub args: IndexMap<String, Value>,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub removed: bool,
    pub source_contract: String,
}

/// Decodes `log` against `descriptor` and normalizes it into a [`CanonicalEvent`].
///
/// Indexed and non-indexed arguments are re-interleaved in declaration order, matching how
/// the event was written in Solidity.
///
/// # Errors
///
/// Returns [`RelayError::Decode`] if the log payload does not match the descriptor's ABI
/// or lacks block/transaction metadata (pending logs are not relayed).
pub fn normalize(descriptor: &EventDescriptor, log: &Log) -> Result<CanonicalEvent, RelayError> {
    let decode_err = |reason: String| RelayError::Decode {
        event: descriptor.name.clone(),
        reason,
    };

    let block_number = log.block_number.ok_or_else(|| decode_err("missing block number".into()))?;
    let transaction_hash =
        log.transaction_hash.ok_or_else(|| decode_err("missing transaction hash".into()))?;
    let log_index = log.log_index.ok_or_else(|| decode_err("missing log index".into()))?;

    let decoded =
        descriptor.event.decode_log(log.data()).map_err(|e| decode_err(e.to_string()))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();

    let mut args = IndexMap::with_capacity(descriptor.event.inputs.len());
    for (position, input) in descriptor.event.inputs.iter().enumerate() {
        let value = if input.indexed { indexed.next() } else { body.next() };
        let value = value.ok_or_else(|| {
            decode_err(format!("decoded log is missing argument `{}`", input.name))
        })?;

        let name = if input.name.is_empty() { position.to_string() } else { input.name.clone() };
        args.insert(name, normalize_value(&value, &input.components));
    }

    Ok(CanonicalEvent {
        event_name: descriptor.name.clone(),
        args,
        block_number,
        transaction_hash: transaction_hash.to_string(),
        log_index,
        removed: log.removed,
        source_contract: log.address().to_checksum(None),
    })
}

/// Recursively converts a decoded ABI value into a serialization-safe JSON value.
///
/// `components` carries the ABI sub-parameter metadata used to name tuple fields; for array
/// values it describes the element type.
pub fn normalize_value(value: &DynSolValue, components: &[Param]) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Address(a) => Value::String(a.to_checksum(None)),
        DynSolValue::Function(f) => Value::String(hex::encode_prefixed(f.as_slice())),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word[..*size]))
        }
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) => {
            Value::Array(values.iter().map(|v| normalize_value(v, components)).collect())
        }
        DynSolValue::Tuple(values) => {
            let mut map = serde_json::Map::with_capacity(values.len());
            for (position, value) in values.iter().enumerate() {
                let component = components.get(position);
                let name = component
                    .map(|param| param.name.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| position.to_string());
                let nested = component.map(|param| param.components.as_slice()).unwrap_or(&[]);
                map.insert(name, normalize_value(value, nested));
            }
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, B256, I256, LogData, U256, address, b256, keccak256};

    use super::*;
    use crate::config::EventDescriptor;

    fn transfer_descriptor() -> EventDescriptor {
        EventDescriptor::parse(
            "Transfer(address indexed from, address indexed to, uint256 value)",
        )
        .unwrap()
    }

    fn transfer_log(descriptor: &EventDescriptor, block_number: u64, log_index: u64) -> Log {
        let from = address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045");
        let to = address!("0x0000000000000000000000000000000000000001");
        let topics = vec![
            descriptor.topic0,
            B256::left_padding_from(from.as_slice()),
            B256::left_padding_from(to.as_slice()),
        ];
        let data = U256::from(42u64).to_be_bytes::<32>();

        Log {
            inner: alloy::primitives::Log {
                address: address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
                data: LogData::new_unchecked(topics, data.to_vec().into()),
            },
            block_hash: Some(b256!(
                "0x1111111111111111111111111111111111111111111111111111111111111111"
            )),
            block_number: Some(block_number),
            block_timestamp: None,
            transaction_hash: Some(keccak256("tx")),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        }
    }

    #[test]
    fn normalizes_transfer_log_in_declaration_order() {
        let descriptor = transfer_descriptor();
        let log = transfer_log(&descriptor, 100, 1);

        let event = normalize(&descriptor, &log).unwrap();

        assert_eq!(event.event_name, "Transfer");
        assert_eq!(event.block_number, 100);
        assert_eq!(event.log_index, 1);
        assert!(!event.removed);
        assert_eq!(event.source_contract, "0x5FbDB2315678afecb367f032d93F642f64180aa3");

        let keys: Vec<&str> = event.args.keys().map(String::as_str).collect();
        assert_eq!(keys, ["from", "to", "value"]);
        assert_eq!(event.args["value"], Value::String("42".into()));
        let from = address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045");
        assert_eq!(event.args["from"], Value::String(from.to_checksum(None)));
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let descriptor = transfer_descriptor();
        let event = normalize(&descriptor, &transfer_log(&descriptor, 7, 0)).unwrap();

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventName"], "Transfer");
        assert_eq!(json["blockNumber"], 7);
        assert_eq!(json["logIndex"], 0);
        assert!(json["transactionHash"].as_str().unwrap().starts_with("0x"));
        assert!(json["sourceContract"].as_str().is_some());
    }

    #[test]
    fn rejects_log_with_mismatched_payload() {
        let descriptor = transfer_descriptor();
        let mut log = transfer_log(&descriptor, 100, 1);
        // Drop the data section so the non-indexed argument cannot be decoded.
        log.inner.data =
            LogData::new_unchecked(log.inner.data.topics().to_vec(), Vec::new().into());

        let result = normalize(&descriptor, &log);

        assert!(matches!(result, Err(RelayError::Decode { .. })));
    }

    #[test]
    fn rejects_pending_log_without_block_number() {
        let descriptor = transfer_descriptor();
        let mut log = transfer_log(&descriptor, 100, 1);
        log.block_number = None;

        assert!(matches!(normalize(&descriptor, &log), Err(RelayError::Decode { .. })));
    }

    #[test]
    fn large_integers_become_decimal_strings() {
        let huge = U256::from(2u8).pow(U256::from(200u8));

        let value = normalize_value(&DynSolValue::Uint(huge, 256), &[]);

        assert_eq!(value, Value::String(huge.to_string()));

        let negative = normalize_value(&DynSolValue::Int(I256::MINUS_ONE, 256), &[]);
        assert_eq!(negative, Value::String("-1".into()));
    }

    #[test]
    fn arrays_normalize_element_wise() {
        let value = DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(1u8), 256),
            DynSolValue::Uint(U256::from(2u8), 256),
        ]);

        let normalized = normalize_value(&value, &[]);

        assert_eq!(
            normalized,
            Value::Array(vec![Value::String("1".into()), Value::String("2".into())])
        );
    }

    #[test]
    fn tuples_become_named_maps() {
        let components = vec![
            Param { ty: "address".into(), name: "owner".into(), components: vec![], internal_type: None },
            Param { ty: "uint256".into(), name: "amount".into(), components: vec![], internal_type: None },
        ];
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::ZERO),
            DynSolValue::Uint(U256::from(9u8), 256),
        ]);

        let normalized = normalize_value(&value, &components);

        let Value::Object(map) = normalized else { panic!("expected object") };
        assert_eq!(map["owner"], Value::String(Address::ZERO.to_checksum(None)));
        assert_eq!(map["amount"], Value::String("9".into()));
    }

    #[test]
    fn unnamed_tuple_fields_fall_back_to_positions() {
        let value = DynSolValue::Tuple(vec![DynSolValue::Bool(true), DynSolValue::Bool(false)]);

        let Value::Object(map) = normalize_value(&value, &[]) else { panic!("expected object") };

        assert_eq!(map["0"], Value::Bool(true));
        assert_eq!(map["1"], Value::Bool(false));
    }

    #[test]
    fn addresses_are_eip55_checksummed() {
        let addr = address!("0xd8dA6BF26964af9d7eed9e03e53415d37aa96045");

        let value = normalize_value(&DynSolValue::Address(addr), &[]);

        // Mixed-case per EIP-55, not the raw lowercase hex.
        assert_eq!(value, Value::String("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".into()));
    }

    #[test]
    fn bytes_become_prefixed_hex() {
        let value = normalize_value(&DynSolValue::Bytes(vec![0xde, 0xad]), &[]);

        assert_eq!(value, Value::String("0xdead".into()));
    }
}
