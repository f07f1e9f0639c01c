//! Deterministic synthetic responses for read-only RPC methods
//!
//! When the node is unreachable the gateway substitutes these values so the
//! console keeps rendering. They match the shape of a live response and are
//! always flagged as fallback-sourced by the caller-facing contract. Mutating
//! methods have no entry here on purpose.

use serde_json::{json, Value};

use super::methods;

/// Synthetic response for `method`, or None if the method must not fall back
pub fn synthetic_response(method: &str) -> Option<Value> {
    match method {
        methods::LIST_PEERS => Some(json!([
            {
                "addr": "198.51.100.10:8333",
                "inbound": false,
                "subver": "/Satoshi:25.0.0/",
                "services": "0000000000000409",
                "pingtime": 0.042,
                "bytessent": 884_211,
                "bytesrecv": 1_240_876,
                "conntime": 1_700_000_000,
            },
            {
                "addr": "203.0.113.77:8333",
                "inbound": true,
                "subver": "/Satoshi:24.1.0/",
                "services": "0000000000000009",
                "pingtime": 0.188,
                "bytessent": 42_118,
                "bytesrecv": 96_402,
                "conntime": 1_700_010_000,
            }
        ])),
        methods::BLOCK_COUNT => Some(json!(0)),
        methods::GET_BLOCK => Some(json!({
            "hash": "0000000000000000000000000000000000000000000000000000000000000000",
            "height": 0,
            "time": 0,
            "tx": [],
        })),
        methods::GET_TRANSACTION => Some(json!({
            "txid": "0000000000000000000000000000000000000000000000000000000000000000",
            "vin": [],
            "vout": [],
        })),
        methods::MEMPOOL_INFO => Some(json!({
            "size": 0,
            "bytes": 0,
            "usage": 0,
        })),
        methods::WALLET_INFO => Some(json!({
            "balance": 0.0,
            "unconfirmed_balance": 0.0,
            "txcount": 0,
        })),
        _ => None,
    }
}
