//! RPC client tests against a mocked EVM JSON-RPC endpoint, following the
//! teacher's `evm_client_tests.rs` pattern of one `MockServer` per test
//! rather than a single shared fixture.

use escrow_core::rpc::EvmClient;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_block_number_parses_hex_result() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": "0x1b4",
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).expect("client");
    let head = client.get_block_number().await.expect("get_block_number");
    assert_eq!(head, 0x1b4);
}

#[tokio::test]
async fn get_logs_decodes_block_timestamp_via_second_call() {
    let mock_server = MockServer::start().await;

    let logs_response = json!({
        "jsonrpc": "2.0",
        "result": [{
            "address": "0xAAAA000000000000000000000000000000000A",
            "topics": ["0xdead"],
            "data": "0x",
            "blockNumber": "0x64",
            "blockHash": "0xbeef",
            "transactionHash": "0xcafe",
            "logIndex": "0x0"
        }],
        "id": 1
    });
    let block_response = json!({
        "jsonrpc": "2.0",
        "result": { "timestamp": "0x5f5e100" },
        "id": 1
    });

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getLogs" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(logs_response))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getBlockByNumber" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(block_response))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).expect("client");
    let logs = client
        .get_logs(100, 100, &["0xAAAA000000000000000000000000000000000A".to_string()])
        .await
        .expect("get_logs");

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_number, 100);
    assert_eq!(logs[0].block_timestamp, 0x5f5e100);
}

#[tokio::test]
async fn remote_json_rpc_error_surfaces_as_rpc_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "header not found" },
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    let client = EvmClient::new(&mock_server.uri()).expect("client");
    let err = client.get_block_number().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("header not found"));
}
