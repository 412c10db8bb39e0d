#![no_main]

//! Fuzz target for JSON-RPC classification and id handling.
//!
//! Any JSON value must classify without panicking, and every classified id
//! must survive a trip through `JsonRpcId` serialization unchanged.

use libfuzzer_sys::fuzz_target;

use stdiogate_core::jsonrpc::{JsonRpcId, JsonRpcMessageKind, classify_jsonrpc};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(kind) = classify_jsonrpc(&value) else {
        return;
    };
    let id = match kind {
        JsonRpcMessageKind::Request { id, .. } | JsonRpcMessageKind::Response { id } => id,
        JsonRpcMessageKind::Notification { .. } => return,
    };
    let encoded = serde_json::to_value(&id).unwrap();
    assert_eq!(encoded, id.to_value());
    let decoded: JsonRpcId = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, id);
});
