//! Correlation under arbitrary response ordering.

use mcp_stdio::protocol::{Envelope, JsonRpcResponse, LineTransport, RequestId, RpcClient, to_raw};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};
use tokio_util::sync::CancellationToken;

/// Issue `n` requests, answer them in `order`, and check every caller got its own answer.
async fn shuffled_delivery(n: usize, order: Vec<usize>) {
    let (local, remote) = duplex(256 * 1024);
    let (read_half, write_half) = tokio::io::split(local);
    let client = Arc::new(RpcClient::new(Arc::new(LineTransport::new(read_half, write_half))));
    let (peer_read, mut peer_write) = tokio::io::split(remote);
    let mut lines = BufReader::new(peer_read).lines();

    let call = client.send_request("initialize", None).await.unwrap();
    let _ = lines.next_line().await.unwrap().unwrap();
    peer_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
        .await
        .unwrap();
    client
        .await_response(call, &CancellationToken::new())
        .await
        .unwrap();

    let mut waiters = Vec::with_capacity(n);
    for i in 0..n {
        let params = to_raw(&json!({ "tag": i })).unwrap();
        let call = client.send_request("tools/call", Some(params)).await.unwrap();
        let id = call.id().clone();
        let client = Arc::clone(&client);
        let waiter = tokio::spawn(async move {
            client.await_response(call, &CancellationToken::new()).await
        });
        waiters.push((id, waiter));
    }

    let mut requests = Vec::with_capacity(n);
    for _ in 0..n {
        let line = lines.next_line().await.unwrap().unwrap();
        let request: Value = serde_json::from_str(&line).unwrap();
        requests.push(request);
    }

    for index in order {
        let request = &requests[index];
        let id = RequestId::Number(request["id"].as_i64().unwrap());
        let echo = json!({ "tag": request["params"]["tag"], "id": request["id"] });
        let response = JsonRpcResponse::success(id, to_raw(&echo).unwrap());
        let mut line = Envelope::Response(response).encode().unwrap();
        line.push(b'\n');
        peer_write.write_all(&line).await.unwrap();
    }

    for (tag, (id, waiter)) in waiters.into_iter().enumerate() {
        let raw = waiter.await.unwrap().unwrap();
        let value: Value = serde_json::from_str(raw.get()).unwrap();
        assert_eq!(value["tag"], tag);
        assert_eq!(RequestId::Number(value["id"].as_i64().unwrap()), id);
    }
    assert_eq!(client.pending_count(), 0);
}

fn sizes_and_orders() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..24).prop_flat_map(|n| (Just(n), Just((0..n).collect::<Vec<_>>()).prop_shuffle()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_responses_reach_their_callers((n, order) in sizes_and_orders()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(shuffled_delivery(n, order));
    }

    #[test]
    fn prop_request_round_trip(
        id in any::<i64>(),
        method in "[a-z]{1,12}(/[a-zA-Z]{1,12})?",
        tag in any::<u32>(),
    ) {
        let params = to_raw(&json!({ "tag": tag })).unwrap();
        let request = mcp_stdio::protocol::JsonRpcRequest::new(id, method.clone()).with_params(params);
        let line = Envelope::Request(request).encode().unwrap();

        match Envelope::decode(&line).unwrap() {
            Envelope::Request(decoded) => {
                prop_assert_eq!(decoded.id, RequestId::Number(id));
                prop_assert_eq!(decoded.method, method);
                let params: Value = serde_json::from_str(decoded.params.unwrap().get()).unwrap();
                prop_assert_eq!(params, json!({ "tag": tag }));
            }
            other => prop_assert!(false, "decoded as {:?}", other.method()),
        }
    }
}
