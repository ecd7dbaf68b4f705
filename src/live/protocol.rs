//! # Live Agent Wire Protocol
//!
//! JSON messages exchanged with the remote conversational agent over its
//! bidirectional WebSocket, and the transport events the session consumes.
//!
//! ## Message Flow:
//! 1. **Client → Server**: `setup` (model, voice, system instruction)
//! 2. **Server → Client**: `setupComplete` → [`TransportEvent::Opened`]
//! 3. **Client → Server**: `realtimeInput.mediaChunks[]` (16kHz PCM, base64)
//! 4. **Server → Client**: `serverContent` with inline 24kHz audio parts and the
//!    `interrupted` barge-in flag → [`TransportEvent::Frame`]
//!
//! There are no sequence numbers; inbound frames are ordered by arrival only.

use serde::{Deserialize, Serialize};

/// Messages sent by the client. Externally tagged: `{"setup": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

impl SetupMessage {
    /// Audio-only setup with a prebuilt voice.
    ///
    /// Bare model ids get the `models/` prefix the service expects.
    pub fn audio(model: &str, voice_name: &str, system_instruction: &str) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                }),
            },
            system_instruction: if system_instruction.trim().is_empty() {
                None
            } else {
                Some(Content::text(system_instruction))
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

impl Content {
    pub fn text(text: &str) -> Self {
        Self {
            parts: vec![TextPart { text: text.to_string() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// One outbound media frame: `{ data: <base64 PCM>, mimeType: "audio/pcm;rate=16000" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// Messages received from the server. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Inbound content as seen by the session: audio chunks in arrival order plus
/// the barge-in flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundFrame {
    /// Base64 PCM payloads, not yet decoded
    pub audio: Vec<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl InboundFrame {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && !self.interrupted && !self.turn_complete
    }
}

/// Transport lifecycle as a tagged union, replacing open/message/error/close
/// callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(InboundFrame),
    Error(String),
    Closed,
}

impl ServerMessage {
    /// Translate a server message into the events it carries, in order.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(TransportEvent::Opened);
        }

        if let Some(content) = self.server_content {
            let audio = content
                .model_turn
                .map(|turn| {
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .filter(|inline| {
                            inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/")
                        })
                        .map(|inline| inline.data)
                        .filter(|data| !data.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let frame = InboundFrame {
                audio,
                interrupted: content.interrupted,
                turn_complete: content.turn_complete,
            };
            if !frame.is_empty() {
                events.push(TransportEvent::Frame(frame));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_serialization() {
        let setup = SetupMessage::audio("gemini-live", "Kore", "Be kind.");
        let json = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();

        assert_eq!(json["setup"]["model"], "models/gemini-live");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be kind."
        );
    }

    #[test]
    fn test_setup_keeps_prefixed_model_and_skips_blank_instruction() {
        let setup = SetupMessage::audio("models/x", "Puck", "  ");
        assert_eq!(setup.model, "models/x");
        let json = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();
        assert!(json["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_realtime_input_serialization() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAA=".to_string(),
            }],
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAA="}]}}"#
        );
    }

    #[test]
    fn test_setup_complete_opens() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msg.into_events(), vec![TransportEvent::Opened]);
    }

    #[test]
    fn test_server_content_with_audio_and_interruption() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "ignored"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "BBBB"}}
                ]},
                "interrupted": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let events = msg.into_events();
        assert_eq!(
            events,
            vec![TransportEvent::Frame(InboundFrame {
                audio: vec!["AAAA".to_string(), "BBBB".to_string()],
                interrupted: true,
                turn_complete: false,
            })]
        );
    }

    #[test]
    fn test_interrupted_only_message() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        match msg.into_events().as_slice() {
            [TransportEvent::Frame(frame)] => {
                assert!(frame.audio.is_empty());
                assert!(frame.interrupted);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_messages_produce_no_events() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert!(msg.into_events().is_empty());

        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"hi"}]}}}"#)
                .unwrap();
        assert!(msg.into_events().is_empty());
    }
}
