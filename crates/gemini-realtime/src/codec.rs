//! Translation between wire frames and typed frames.

use crate::error::{DecodeError, Result};
use crate::protocol::{
    GoAway, InboundFrame, OutboundFrame, ServerContent, ToolCall, ToolCallCancellation,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One frame exactly as the transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Bytes),
}

impl RawFrame {
    /// The frame as UTF-8 text. The server sends JSON in both text and binary messages.
    pub fn as_text(&self) -> std::result::Result<&str, DecodeError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8),
        }
    }
}

/// Every top-level key the server may send. Unmodelled siblings such as
/// `usageMetadata` are ignored.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    go_away: Option<GoAway>,
}

/// Encodes an outbound frame as JSON text.
pub fn encode(frame: &OutboundFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes an inbound frame.
///
/// A frame that parses as JSON but carries none of the known keys yields
/// [`DecodeError::UnknownFrame`].
pub fn decode(raw: &RawFrame) -> std::result::Result<InboundFrame, DecodeError> {
    let text = raw.as_text()?;
    let value: Value = serde_json::from_str(text)?;
    let keys = match &value {
        Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
        _ => return Err(DecodeError::UnknownFrame(String::new())),
    };
    let envelope: ServerEnvelope = serde_json::from_value(value)?;

    if envelope.setup_complete.is_some() {
        Ok(InboundFrame::SetupComplete)
    } else if let Some(content) = envelope.server_content {
        Ok(InboundFrame::ServerContent(content))
    } else if let Some(call) = envelope.tool_call {
        Ok(InboundFrame::ToolCall(call))
    } else if let Some(cancellation) = envelope.tool_call_cancellation {
        Ok(InboundFrame::ToolCallCancellation(cancellation))
    } else if let Some(go_away) = envelope.go_away {
        Ok(InboundFrame::GoAway(go_away))
    } else {
        Err(DecodeError::UnknownFrame(keys))
    }
}

/// Decodes an outbound frame; the server-side view of [`encode`].
pub fn decode_outbound(text: &str) -> std::result::Result<OutboundFrame, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes an inbound frame; the server-side view of [`decode`].
pub fn encode_inbound(frame: &InboundFrame) -> Result<String> {
    let mut envelope = ServerEnvelope::default();
    match frame {
        InboundFrame::SetupComplete => envelope.setup_complete = Some(Value::Object(Default::default())),
        InboundFrame::ServerContent(content) => envelope.server_content = Some(content.clone()),
        InboundFrame::ToolCall(call) => envelope.tool_call = Some(call.clone()),
        InboundFrame::ToolCallCancellation(c) => envelope.tool_call_cancellation = Some(c.clone()),
        InboundFrame::GoAway(go_away) => envelope.go_away = Some(go_away.clone()),
    }
    Ok(serde_json::to_string(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use serde_json::json;

    fn text(value: Value) -> RawFrame {
        RawFrame::Text(value.to_string())
    }

    #[test]
    fn test_decode_setup_complete() {
        let frame = decode(&text(json!({"setupComplete": {}}))).unwrap();
        assert_eq!(frame, InboundFrame::SetupComplete);
    }

    #[test]
    fn test_decode_distinguishes_server_content_shapes() {
        let text_only = decode(&text(json!({
            "serverContent": {"modelTurn": {"parts": [{"text": "Hi"}]}}
        })))
        .unwrap();
        let InboundFrame::ServerContent(content) = text_only else {
            panic!("expected serverContent");
        };
        assert_eq!(content.model_turn.unwrap().parts[0].text.as_deref(), Some("Hi"));
        assert!(!content.turn_complete && !content.interrupted);

        let audio = decode(&text(json!({
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAEC"}}
            ]}}
        })))
        .unwrap();
        let InboundFrame::ServerContent(content) = audio else {
            panic!("expected serverContent");
        };
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts[0].audio().unwrap().data.as_ref(), &[0u8, 1, 2]);

        let interrupted = decode(&text(json!({"serverContent": {"interrupted": true}}))).unwrap();
        assert!(matches!(interrupted, InboundFrame::ServerContent(c) if c.interrupted && !c.turn_complete));

        let complete = decode(&text(json!({"serverContent": {"turnComplete": true}}))).unwrap();
        assert!(matches!(complete, InboundFrame::ServerContent(c) if c.turn_complete && c.model_turn.is_none()));
    }

    #[test]
    fn test_decode_tool_call_and_cancellation() {
        let frame = decode(&text(json!({
            "toolCall": {"functionCalls": [
                {"id": "1", "name": "search", "args": {"query": "paris hotels"}}
            ]}
        })))
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::ToolCall(ToolCall {
                function_calls: vec![FunctionCall {
                    id: "1".into(),
                    name: "search".into(),
                    args: json!({"query": "paris hotels"}),
                }],
            })
        );

        let frame = decode(&text(json!({"toolCallCancellation": {"ids": ["1", "2"]}}))).unwrap();
        assert_eq!(
            frame,
            InboundFrame::ToolCallCancellation(ToolCallCancellation {
                ids: vec!["1".into(), "2".into()],
            })
        );
    }

    #[test]
    fn test_decode_binary_json_and_sibling_keys() {
        let raw = RawFrame::Binary(Bytes::from(
            json!({"serverContent": {"turnComplete": true}, "usageMetadata": {"totalTokenCount": 7}})
                .to_string(),
        ));
        assert!(matches!(decode(&raw).unwrap(), InboundFrame::ServerContent(_)));
    }

    #[test]
    fn test_decode_go_away() {
        let frame = decode(&text(json!({"goAway": {"timeLeft": "10s"}}))).unwrap();
        assert_eq!(
            frame,
            InboundFrame::GoAway(GoAway {
                time_left: Some("10s".into())
            })
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(&RawFrame::Text("{not json".into())),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(&text(json!({"somethingNew": {}}))),
            Err(DecodeError::UnknownFrame(keys)) if keys == "somethingNew"
        ));
        assert!(matches!(
            decode(&text(json!([1, 2, 3]))),
            Err(DecodeError::UnknownFrame(_))
        ));
        assert!(matches!(
            decode(&RawFrame::Binary(Bytes::from_static(&[0xff, 0xfe]))),
            Err(DecodeError::InvalidUtf8)
        ));
        // Known key, wrong shape.
        assert!(matches!(
            decode(&text(json!({"toolCall": {"functionCalls": [{"name": "x"}]}}))),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_outbound_round_trip() {
        let frames = vec![
            OutboundFrame::Setup(Setup {
                model: "models/m1".into(),
                generation_config: Some(GenerationConfig {
                    response_modalities: vec![ResponseModality::Audio],
                    speech_config: Some(SpeechConfig::prebuilt("Puck")),
                    temperature: Some(0.5),
                }),
                system_instruction: Some(Content::text("You find hotels.")),
                tools: vec![Tool {
                    function_declarations: vec![FunctionDeclaration {
                        name: "search".into(),
                        description: "Search hotels".into(),
                        parameters: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
                    }],
                }],
                input_audio_transcription: None,
                output_audio_transcription: Some(AudioTranscriptionConfig::default()),
            }),
            OutboundFrame::RealtimeInput(RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: "audio/pcm;rate=16000".into(),
                    data: Bytes::from_static(&[1, 2, 3, 4]),
                }],
            }),
            OutboundFrame::ClientContent(ClientContent {
                turns: vec![Content::user_text("find me a hotel")],
                turn_complete: true,
            }),
            OutboundFrame::ToolResponse(ToolResponse {
                function_responses: vec![FunctionResponse::new("1", json!({"output": {}}))],
            }),
        ];

        for frame in frames {
            let wire = encode(&frame).unwrap();
            assert_eq!(decode_outbound(&wire).unwrap(), frame, "wire: {wire}");
        }
    }

    #[test]
    fn test_inbound_encode_is_readable_by_decode() {
        let frame = InboundFrame::ServerContent(ServerContent {
            interrupted: true,
            ..Default::default()
        });
        let wire = encode_inbound(&frame).unwrap();
        assert_eq!(wire, r#"{"serverContent":{"interrupted":true}}"#);
        assert_eq!(decode(&RawFrame::Text(wire)).unwrap(), frame);

        let wire = encode_inbound(&InboundFrame::SetupComplete).unwrap();
        assert_eq!(wire, r#"{"setupComplete":{}}"#);
    }
}
