//! Voice boundary: speech-to-text and text-to-speech over HTTP.
//!
//! A transcript is handled exactly like typed input. Speech output is the
//! generated answer reshaped for listening; it never changes what is
//! retrieved or generated.

use crate::config::VoiceSettings;
use crate::error::{BuddyError, Result};
use crate::tutor::{TutorEngine, TutorMode, TutorReply};
use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Speech recognition and synthesis service.
#[async_trait]
pub trait VoiceService: Send + Sync {
    /// Audio bytes to transcript text.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String>;

    /// Text to audio bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Whether the service is up with its models loaded.
    async fn is_available(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    success: bool,
    #[serde(default)]
    transcription: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    success: bool,
    #[serde(default)]
    audio_base64: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    models_loaded: bool,
}

/// Client for the voice microservice.
pub struct HttpVoiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVoiceClient {
    pub fn new(settings: &VoiceSettings) -> Result<Self> {
        let base = Url::parse(&settings.service_url).map_err(|e| {
            BuddyError::Config(format!("invalid voice service url {}: {}", settings.service_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request_error(e: reqwest::Error) -> BuddyError {
        if e.is_timeout() {
            BuddyError::Voice("voice service timed out".into())
        } else if e.is_connect() {
            BuddyError::Voice("voice service not reachable".into())
        } else {
            BuddyError::Voice(e.to_string())
        }
    }
}

#[async_trait]
impl VoiceService for HttpVoiceClient {
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(Self::request_error)?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(self.endpoint("transcribe"))
            .multipart(form)
            .send()
            .await
            .map_err(Self::request_error)?;
        if !response.status().is_success() {
            return Err(BuddyError::Voice(format!("HTTP {}", response.status())));
        }

        let body: TranscribeResponse = response.json().await.map_err(Self::request_error)?;
        if !body.success {
            return Err(BuddyError::Voice(
                body.error.unwrap_or_else(|| "transcription failed".into()),
            ));
        }
        let transcript = body.transcription.trim().to_string();
        debug!("Transcribed {} chars", transcript.len());
        Ok(transcript)
    }

    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.endpoint("synthesize_simple"))
            .query(&[("text", text)])
            .send()
            .await
            .map_err(Self::request_error)?;
        if !response.status().is_success() {
            return Err(BuddyError::Voice(format!("HTTP {}", response.status())));
        }

        let body: SynthesizeResponse = response.json().await.map_err(Self::request_error)?;
        if !body.success {
            return Err(BuddyError::Voice(
                body.error.unwrap_or_else(|| "speech synthesis failed".into()),
            ));
        }
        decode_audio(&body.audio_base64)
    }

    async fn is_available(&self) -> bool {
        let response = match self.client.get(self.endpoint("health")).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("Voice service health check returned {}", r.status());
                return false;
            }
            Err(e) => {
                warn!("Voice service not available: {}", e);
                return false;
            }
        };
        response
            .json::<HealthResponse>()
            .await
            .map(|h| h.models_loaded)
            .unwrap_or(false)
    }
}

fn decode_audio(encoded: &str) -> Result<Vec<u8>> {
    let audio = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| BuddyError::Voice(format!("invalid audio payload: {}", e)))?;
    if audio.is_empty() {
        return Err(BuddyError::Voice("empty audio payload".into()));
    }
    Ok(audio)
}

static DIRECT_ANSWER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bis\s+[a-d]\s+correct",
        r"\bwhat.*answer",
        r"\bwhich.*correct",
        r"\bwhat.*right",
        r"\btell me.*answer",
        r"\bwhat.*letter",
        r"\bshould i choose",
        r"\bgive me.*answer",
        r"\bwhats.*answer",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Whether the student is asking to be handed an answer.
pub fn wants_direct_answer(text: &str) -> bool {
    let lower = text.to_lowercase();
    DIRECT_ANSWER.iter().any(|re| re.is_match(&lower))
}

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#{1,6}\s+").unwrap());
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-•*]\s+").unwrap());
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*\d+\.\s+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Shape generated text for listening: markdown stripped, at most two
/// sentences, at most `max_words` words.
pub fn prepare_for_speech(text: &str, max_words: usize) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = CODE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = BULLET.replace_all(&text, "");
    let text = NUMBERED.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");

    let sentences: Vec<&str> = text.split('.').map(str::trim).filter(|s| !s.is_empty()).collect();
    if sentences.is_empty() {
        return "I'm not sure about that.".to_string();
    }
    let spoken = format!("{}.", sentences[..sentences.len().min(2)].join(". "));

    let words: Vec<&str> = spoken.split_whitespace().collect();
    if words.len() > max_words {
        let mut capped = words[..max_words].join(" ");
        capped = capped.trim_end_matches('.').to_string();
        capped.push('.');
        capped
    } else {
        spoken
    }
}

/// Result of one spoken exchange.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceReply {
    pub transcript: String,
    pub reply: TutorReply,
    pub spoken_text: String,
    /// Synthesized reply, when requested and the service produced it.
    #[serde(skip)]
    pub audio: Option<Vec<u8>>,
}

/// Runs tutoring turns from recorded audio.
pub struct VoiceAssistant {
    voice: Arc<dyn VoiceService>,
    max_spoken_words: usize,
}

impl VoiceAssistant {
    pub fn new(voice: Arc<dyn VoiceService>, max_spoken_words: usize) -> Self {
        Self {
            voice,
            max_spoken_words,
        }
    }

    pub fn service(&self) -> &Arc<dyn VoiceService> {
        &self.voice
    }

    /// Transcribe `audio`, answer it as a tutoring turn and optionally speak
    /// the answer. Requests for a direct answer are answered in hint mode.
    #[instrument(skip(self, tutor, audio, quiz_context))]
    pub async fn converse(
        &self,
        tutor: &TutorEngine,
        session_id: Uuid,
        audio: Vec<u8>,
        mode: TutorMode,
        quiz_context: Option<&str>,
        speak: bool,
    ) -> Result<VoiceReply> {
        let transcript = self.voice.transcribe(audio).await?;
        if transcript.is_empty() {
            return Err(BuddyError::InvalidInput("no speech detected".into()));
        }

        let mode = if wants_direct_answer(&transcript) && mode != TutorMode::Hint {
            info!("Direct answer requested by voice, switching to hint mode");
            TutorMode::Hint
        } else {
            mode
        };

        let reply = tutor.ask(session_id, &transcript, mode, quiz_context).await?;
        let spoken_text = prepare_for_speech(&reply.text, self.max_spoken_words);

        let audio = if speak {
            match self.voice.synthesize(&spoken_text).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Speech synthesis failed, returning text only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(VoiceReply {
            transcript,
            reply,
            spoken_text,
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, Prompts, RetrievalSettings, TutorSettings};
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::generation::testing::ScriptedModel;
    use crate::generation::GenerationClient;
    use crate::ingest::tests::{biology_text, ingestor, MapExtractor};
    use crate::rag::{PromptBudget, PromptComposer, Retriever};
    use crate::store::Repository;
    use crate::vector_store::{MemoryVectorIndex, VectorIndex};

    struct FakeVoice {
        transcript: String,
        synthesis_works: bool,
    }

    #[async_trait]
    impl VoiceService for FakeVoice {
        async fn transcribe(&self, _audio: Vec<u8>) -> Result<String> {
            Ok(self.transcript.clone())
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            if self.synthesis_works {
                Ok(text.as_bytes().to_vec())
            } else {
                Err(BuddyError::Voice("tts down".into()))
            }
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    async fn tutor(model: Arc<ScriptedModel>) -> (TutorEngine, Uuid) {
        let repo = Repository::in_memory();
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
        let ingest = ingestor(repo.clone(), Arc::new(MapExtractor::default()), index.clone());
        let doc = ingest.register("ana", "Biology").await.unwrap();
        ingest.ingest_text(doc.id, &biology_text()).await.unwrap();

        let engine = TutorEngine::new(
            repo.clone(),
            Arc::new(Retriever::new(repo, embedder, index)),
            Arc::new(PromptComposer::new(
                Prompts::default(),
                PromptBudget::from(&RetrievalSettings::default()),
            )),
            GenerationClient::new(model, &LlmSettings::default()),
            TutorSettings::default(),
            2,
        );
        let session = engine.create_session("ana", vec![doc.id]).await.unwrap();
        (engine, session.id)
    }

    #[test]
    fn test_direct_answer_detection() {
        assert!(wants_direct_answer("Is B correct?"));
        assert!(wants_direct_answer("just tell me the answer please"));
        assert!(wants_direct_answer("Which one is correct for number 3"));
        assert!(!wants_direct_answer("Can you explain photosynthesis?"));
        assert!(!wants_direct_answer("How do mitochondria make ATP"));
    }

    #[test]
    fn test_prepare_for_speech() {
        let text = "## Summary\n**Photosynthesis** turns light into energy. It happens in `chloroplasts`. Plants also need water.";
        assert_eq!(
            prepare_for_speech(text, 30),
            "Summary Photosynthesis turns light into energy. It happens in chloroplasts."
        );
    }

    #[test]
    fn test_prepare_for_speech_lists_and_word_cap() {
        let text = "- first point\n- second point";
        assert_eq!(prepare_for_speech(text, 30), "first point second point.");

        let long: Vec<String> = (1..=40).map(|i| format!("w{}", i)).collect();
        let spoken = prepare_for_speech(&long.join(" "), 30);
        assert_eq!(spoken.split_whitespace().count(), 30);
        assert!(spoken.ends_with("w30."));

        assert_eq!(prepare_for_speech("  ", 30), "I'm not sure about that.");
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("UklGRg==").unwrap(), b"RIFF".to_vec());
        assert!(decode_audio("not base64!").is_err());
        assert!(decode_audio("").is_err());
    }

    #[test]
    fn test_client_rejects_bad_url() {
        let settings = VoiceSettings {
            service_url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(HttpVoiceClient::new(&settings), Err(BuddyError::Config(_))));

        let client = HttpVoiceClient::new(&VoiceSettings::default()).unwrap();
        assert_eq!(client.endpoint("transcribe"), "http://127.0.0.1:8001/transcribe");
    }

    #[tokio::test]
    async fn test_direct_answer_request_switches_to_hint() {
        let model = Arc::new(ScriptedModel::always(
            "Think about where glucose is split. Recall the cytoplasm section. More detail follows here.",
        ));
        let (engine, session) = tutor(model.clone()).await;
        let assistant = VoiceAssistant::new(
            Arc::new(FakeVoice {
                transcript: "What is the answer to question two?".into(),
                synthesis_works: true,
            }),
            30,
        );

        let reply = assistant
            .converse(&engine, session, vec![1, 2, 3], TutorMode::Tutor, None, true)
            .await
            .unwrap();

        assert_eq!(reply.reply.mode, TutorMode::Hint);
        assert!(model.last_prompt().unwrap().contains("Never state the final answer"));
        assert_eq!(
            reply.spoken_text,
            "Think about where glucose is split. Recall the cytoplasm section."
        );
        assert_eq!(reply.audio.as_deref(), Some(reply.spoken_text.as_bytes()));
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_text_reply() {
        let model = Arc::new(ScriptedModel::always("Chlorophyll absorbs red and blue light."));
        let (engine, session) = tutor(model).await;
        let assistant = VoiceAssistant::new(
            Arc::new(FakeVoice {
                transcript: "What does chlorophyll absorb".into(),
                synthesis_works: false,
            }),
            30,
        );

        let reply = assistant
            .converse(&engine, session, vec![0], TutorMode::Explain, None, true)
            .await
            .unwrap();
        assert_eq!(reply.reply.mode, TutorMode::Explain);
        assert!(reply.audio.is_none());
        assert_eq!(engine.get(session).await.unwrap().turns.len(), 2);
    }
}
