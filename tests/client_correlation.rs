//! Client against a live server over in-memory pipes.

use mcp_stdio::client::McpClient;
use mcp_stdio::config::ClientConfig;
use mcp_stdio::error::ClientError;
use mcp_stdio::protocol::{LineTransport, McpServer, McpServerBuilder};
use mcp_stdio::schema::{ClientCapabilities, CompleteArgument, Content, LoggingLevel, Reference};
use mcp_stdio::server::{EchoTool, ToolRegistry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Client = McpClient<LineTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>;

struct Harness {
    client: Client,
    server: Arc<McpServer>,
    shutdown: CancellationToken,
    task: JoinHandle<mcp_stdio::Result<()>>,
}

fn start(concurrent: bool) -> Harness {
    let tools = ToolRegistry::new();
    tools.register(EchoTool);
    let server = Arc::new(
        McpServerBuilder::new()
            .name("harness")
            .version("9.9.9")
            .concurrent_requests(concurrent)
            .tools(tools)
            .build()
            .unwrap(),
    );

    let (client_io, server_io) = duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let transport = Arc::new(LineTransport::new(server_read, server_write));
    let shutdown = CancellationToken::new();
    let task = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve(transport, shutdown).await })
    };

    let (client_read, client_write) = tokio::io::split(client_io);
    let client = McpClient::with_streams(client_read, client_write, ClientConfig::default());

    Harness {
        client,
        server,
        shutdown,
        task,
    }
}

#[tokio::test]
async fn test_full_session() {
    let h = start(false);
    let cancel = CancellationToken::new();

    let init = h
        .client
        .initialize(ClientCapabilities::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(init.server_info.name, "harness");
    assert_eq!(init.server_info.version, "9.9.9");
    assert!(init.capabilities.tools.is_some());

    h.client.ping(&cancel).await.unwrap();

    let tools = h.client.list_tools(None, &cancel).await.unwrap();
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "echo");

    let echoed = h
        .client
        .call_tool("echo", json!({"text": "hello"}), &cancel)
        .await
        .unwrap();
    assert_eq!(echoed.content, vec![Content::text("hello")]);

    let resources = h.client.list_resources(None, &cancel).await.unwrap();
    assert!(resources.resources.is_empty());
    let read = h.client.read_resource("file:///a", &cancel).await.unwrap();
    assert_eq!(read.contents.len(), 1);

    h.client.subscribe_resource("file:///a", &cancel).await.unwrap();
    assert!(h.server.state().is_subscribed("file:///a"));
    h.client
        .unsubscribe_resource("file:///a", &cancel)
        .await
        .unwrap();
    assert!(!h.server.state().is_subscribed("file:///a"));

    let prompts = h.client.list_prompts(None, &cancel).await.unwrap();
    assert!(prompts.prompts.is_empty());
    let prompt = h
        .client
        .get_prompt("greeting", HashMap::new(), &cancel)
        .await
        .unwrap();
    assert!(prompt.messages.is_empty());

    h.client
        .set_logging_level(LoggingLevel::Debug, &cancel)
        .await
        .unwrap();
    assert_eq!(h.server.state().log_level(), LoggingLevel::Debug);

    let completion = h
        .client
        .complete(
            Reference::Prompt {
                name: "greeting".into(),
            },
            CompleteArgument {
                name: "who".into(),
                value: "w".into(),
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(completion.completion.values.is_empty());

    h.shutdown.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_tool_surfaces_rpc_error() {
    let h = start(false);
    let cancel = CancellationToken::new();
    h.client
        .initialize(ClientCapabilities::default(), &cancel)
        .await
        .unwrap();

    let err = h
        .client
        .call_tool("missing", json!({}), &cancel)
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32603);
            assert_eq!(message, "unknown tool: missing");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_connection() {
    let h = Arc::new(start(true));
    let cancel = CancellationToken::new();
    h.client
        .initialize(ClientCapabilities::default(), &cancel)
        .await
        .unwrap();

    let mut calls = Vec::new();
    for i in 0..16 {
        let h = Arc::clone(&h);
        calls.push(tokio::spawn(async move {
            let text = format!("call-{i}");
            let result = h
                .client
                .call_tool("echo", json!({ "text": text }), &CancellationToken::new())
                .await
                .unwrap();
            (text, result)
        }));
    }

    for call in calls {
        let (text, result) = call.await.unwrap();
        assert_eq!(result.content, vec![Content::text(text)]);
    }
    assert_eq!(h.client.rpc().pending_count(), 0);
}

#[tokio::test]
async fn test_server_shutdown_fails_waiters() {
    let h = start(false);
    let cancel = CancellationToken::new();
    h.client
        .initialize(ClientCapabilities::default(), &cancel)
        .await
        .unwrap();

    h.shutdown.cancel();
    h.task.await.unwrap().unwrap();
    drop(h.server);

    // The server half of the pipe is gone once the serve task has returned.
    let err = h.client.ping(&cancel).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionClosed | ClientError::Transport(_)
    ));
}
