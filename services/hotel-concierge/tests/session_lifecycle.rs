use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gemini_realtime::codec;
use gemini_realtime::protocol::{FunctionCall, InboundFrame, OutboundFrame, ToolCall};
use gemini_realtime::{ConnectionConfig, LiveClient};
use hotel_concierge::search::{DownstreamError, SEARCH_HOTELS, SearchBackend, ToolDispatcher};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

type ServerWs = WebSocketStream<TcpStream>;

/// Answers every query after a fixed delay, echoing the query back.
struct DelayedBackend(Duration);

#[async_trait]
impl SearchBackend for DelayedBackend {
    async fn search(&self, query: String) -> Result<Value, DownstreamError> {
        tokio::time::sleep(self.0).await;
        Ok(json!([{ "query": query }]))
    }
}

async fn listen() -> (TcpListener, ConnectionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/live", listener.local_addr().unwrap());
    let config = ConnectionConfig::new("test-key", "m1").with_endpoint(endpoint);
    (listener, config)
}

async fn next_frame(ws: &mut ServerWs) -> OutboundFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .unwrap()
            .unwrap();
        match message {
            Message::Text(text) => return codec::decode_outbound(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message from client: {other:?}"),
        }
    }
}

async fn send_frame(ws: &mut ServerWs, frame: InboundFrame) {
    let text = codec::encode_inbound(&frame).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn connect(client: &LiveClient, listener: &TcpListener, config: &ConnectionConfig) -> ServerWs {
    let server = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        assert!(matches!(next_frame(&mut ws).await, OutboundFrame::Setup(_)));
        send_frame(&mut ws, InboundFrame::SetupComplete).await;
        ws
    };
    let (result, ws) = tokio::join!(client.connect(config), server);
    result.unwrap();
    ws
}

fn search_call(id: &str, query: &str) -> InboundFrame {
    InboundFrame::ToolCall(ToolCall {
        function_calls: vec![FunctionCall {
            id: id.into(),
            name: SEARCH_HOTELS.into(),
            args: json!({ "query": query }),
        }],
    })
}

#[tokio::test]
async fn test_call_answered_in_its_own_session() {
    let client = LiveClient::new();
    let dispatcher = ToolDispatcher::new(Arc::new(DelayedBackend(Duration::from_millis(10))));
    dispatcher.attach(&client);
    let (listener, config) = listen().await;
    let mut ws = connect(&client, &listener, &config).await;

    send_frame(&mut ws, search_call("c-1", "porto")).await;

    let OutboundFrame::ToolResponse(response) = next_frame(&mut ws).await else {
        panic!("expected toolResponse");
    };
    assert_eq!(response.function_responses[0].id, "c-1");
    assert_eq!(
        response.function_responses[0].response,
        json!({ "output": [{ "query": "porto" }] })
    );
    assert!(client.pending_tool_calls().is_empty());
}

#[tokio::test]
async fn test_calls_of_a_closed_session_are_not_answered_after_reconnect() {
    let client = LiveClient::new();
    let dispatcher = ToolDispatcher::new(Arc::new(DelayedBackend(Duration::from_millis(200))));
    dispatcher.attach(&client);

    let (first, config) = listen().await;
    let mut old_ws = connect(&client, &first, &config).await;
    send_frame(&mut old_ws, search_call("old-1", "vienna")).await;

    let started = tokio::time::timeout(Duration::from_secs(2), async {
        while dispatcher.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(started.is_ok(), "call was never dispatched");

    client.disconnect();
    assert_eq!(dispatcher.in_flight(), 0);

    let (second, config) = listen().await;
    let mut ws = connect(&client, &second, &config).await;
    send_frame(&mut ws, search_call("new-1", "graz")).await;

    // A stale answer for old-1 would be due first.
    let OutboundFrame::ToolResponse(response) = next_frame(&mut ws).await else {
        panic!("expected toolResponse");
    };
    assert_eq!(response.function_responses.len(), 1);
    assert_eq!(response.function_responses[0].id, "new-1");

    let extra = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(extra.is_err(), "unexpected frame after the answer: {extra:?}");
}
