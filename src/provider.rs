//! Generative content seam. The crate never formats model requests itself;
//! callers plug in a [`ContentProvider`] and get typed results back.

use std::time::Duration;

use async_trait::async_trait;
use base64::{
    engine::general_purpose::STANDARD,
    Engine as _,
};
use rand::{
    seq::IndexedRandom,
    Rng,
};
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::core::{
    ExamSection,
    Explanation,
    StudyContent,
    TutorError,
    WordCard,
};

pub const VOICE_NAMES: [&str; 5] = ["Kore", "Aoede", "Puck", "Charon", "Fenrir"];
pub const RANDOM_VOICE: &str = "random";
pub const DEFAULT_VOICE: &str = "Kore";

/// Resolves the voice setting to a concrete voice, drawing one at random for `"random"`.
pub fn resolve_voice<R: Rng + ?Sized>(selected: &str, rng: &mut R) -> String {
    if selected == RANDOM_VOICE || selected.is_empty() {
        return VOICE_NAMES.choose(rng).unwrap_or(&DEFAULT_VOICE).to_string();
    }
    selected.to_string()
}

/// Exam question as returned by the model; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawExamQuestion {
    pub id: Option<String>,
    pub question: Option<String>,
    pub passage: Option<String>,
    pub audio_text: Option<String>,
    pub options: Option<Vec<String>>,
    pub answer: Option<String>,
    pub explanation_seed: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedExam {
    pub listening: Vec<RawExamQuestion>,
    pub reading: Vec<RawExamQuestion>,
    pub vocabulary: Vec<RawExamQuestion>,
    pub grammar: Vec<RawExamQuestion>,
}

impl GeneratedExam {
    pub fn section(&self, section: ExamSection) -> &[RawExamQuestion] {
        match section {
            ExamSection::Listening => &self.listening,
            ExamSection::Reading => &self.reading,
            ExamSection::Vocabulary => &self.vocabulary,
            ExamSection::Grammar => &self.grammar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongPayloadItem {
    pub id: String,
    pub section: ExamSection,
    pub question: String,
    pub selected: String,
    pub answer: String,
    pub hint: String,
}

/// Request body for wrong-answer explanations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongPayload {
    pub target_score: u32,
    pub wrong_items: Vec<WrongPayloadItem>,
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate_study_content(
        &self,
        target_score: u32,
        topic: Option<&str>,
    ) -> Result<StudyContent, TutorError>;

    async fn generate_word_card(&self, word: &str) -> Result<WordCard, TutorError>;

    async fn generate_exam(&self, target_score: u32) -> Result<GeneratedExam, TutorError>;

    async fn generate_explanations(
        &self,
        payload: &WrongPayload,
    ) -> Result<Vec<Explanation>, TutorError>;

    /// Raw PCM bytes for `text` spoken by `voice`.
    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<Vec<u8>, TutorError>;
}

/// Parses model output that should be JSON, tolerating markdown code fences.
/// Empty or malformed text is a [`TutorError::ContentFormat`], never a default value.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, TutorError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(TutorError::ContentFormat("empty response from content provider".to_string()));
    }
    serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(120).collect();
        TutorError::ContentFormat(format!("{e} (response: {preview})"))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListeningAudio {
    /// Base64 PCM clip.
    Clip(String),
    /// Synthesis kept failing; the caller should use on-device speech instead.
    Fallback { message: String },
}

/// Synthesizes `text`, retrying up to `attempts` times with a fixed delay after
/// each failure. Never errors: exhausting the attempts yields a fallback.
pub async fn synthesize_with_retry(
    provider: &dyn ContentProvider,
    text: &str,
    voice: &str,
    attempts: u32,
    delay: Duration,
) -> ListeningAudio {
    let mut last_error = String::new();
    for attempt in 1..=attempts.max(1) {
        match provider.synthesize_speech(text, voice).await {
            Ok(bytes) if !bytes.is_empty() => return ListeningAudio::Clip(STANDARD.encode(bytes)),
            Ok(_) => last_error = "speech synthesis returned no audio".to_string(),
            Err(e) => last_error = e.to_string(),
        }
        warn!(attempt, voice, error = %last_error, "speech synthesis failed");
        tokio::time::sleep(delay).await;
    }
    ListeningAudio::Fallback { message: last_error }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Mutex,
    };

    use super::*;
    use crate::core::Segment;

    /// Scripted provider for tests. Speech fails `speech_failures` times before succeeding.
    #[derive(Default)]
    pub struct FakeProvider {
        pub speech_failures: usize,
        pub speech_calls: AtomicUsize,
        pub card_calls: AtomicUsize,
        pub explanation_calls: AtomicUsize,
        pub exam: Mutex<GeneratedExam>,
    }

    #[async_trait]
    impl ContentProvider for FakeProvider {
        async fn generate_study_content(
            &self,
            _target_score: u32,
            topic: Option<&str>,
        ) -> Result<StudyContent, TutorError> {
            Ok(StudyContent {
                segments: vec![
                    Segment {
                        en: format!("We reviewed the {} budget.", topic.unwrap_or("quarterly")),
                        zh: "我們檢視了預算。".to_string(),
                    },
                    Segment { en: "The invoice was late.".to_string(), zh: "發票遲了。".to_string() },
                ],
                vocabulary: vec![WordCard {
                    word: "invoice".to_string(),
                    pos: "n.".to_string(),
                    def: "發票".to_string(),
                    ..Default::default()
                }],
                phrases: Vec::new(),
                article: None,
                translation: None,
            })
        }

        async fn generate_word_card(&self, word: &str) -> Result<WordCard, TutorError> {
            self.card_calls.fetch_add(1, Ordering::SeqCst);
            Ok(WordCard {
                word: word.to_string(),
                pos: "v.".to_string(),
                ipa: "/x/".to_string(),
                def: format!("{word}-zh"),
                ex: format!("Please {word} it."),
                ex_zh: "請處理。".to_string(),
            })
        }

        async fn generate_exam(&self, _target_score: u32) -> Result<GeneratedExam, TutorError> {
            Ok(self.exam.lock().unwrap().clone())
        }

        async fn generate_explanations(
            &self,
            payload: &WrongPayload,
        ) -> Result<Vec<Explanation>, TutorError> {
            self.explanation_calls.fetch_add(1, Ordering::SeqCst);
            Ok(payload
                .wrong_items
                .iter()
                .map(|item| Explanation {
                    id: item.id.clone(),
                    why_wrong: format!("{} is not {}", item.selected, item.answer),
                    key_point: "grammar".to_string(),
                    trap: String::new(),
                })
                .collect())
        }

        async fn synthesize_speech(&self, text: &str, _voice: &str) -> Result<Vec<u8>, TutorError> {
            let call = self.speech_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.speech_failures {
                return Err(TutorError::RemoteTransport {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(text.as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use base64::Engine as _;
    use rand::{
        rngs::StdRng,
        SeedableRng,
    };

    use super::{
        fake::FakeProvider,
        *,
    };

    #[test]
    fn test_parse_model_json_strips_fences() {
        let raw = "```json\n{\"word\":\"audit\",\"def\":\"審計\"}\n```";
        let card: WordCard = parse_model_json(raw).unwrap();
        assert_eq!(card.word, "audit");
        assert_eq!(card.def, "審計");
    }

    #[test]
    fn test_parse_model_json_rejects_empty_and_malformed() {
        let empty = parse_model_json::<WordCard>("  ```json ``` ").unwrap_err();
        assert!(matches!(empty, TutorError::ContentFormat(_)));

        let malformed = parse_model_json::<StudyContent>("{\"segments\": [").unwrap_err();
        assert!(matches!(malformed, TutorError::ContentFormat(_)));
    }

    #[test]
    fn test_generated_exam_tolerates_missing_fields() {
        let exam: GeneratedExam =
            parse_model_json(r#"{"listening":[{"question":"Where?","audioText":"At the desk."}]}"#)
                .unwrap();
        assert_eq!(exam.section(ExamSection::Listening).len(), 1);
        assert_eq!(exam.listening[0].audio_text.as_deref(), Some("At the desk."));
        assert!(exam.section(ExamSection::Grammar).is_empty());
    }

    #[test]
    fn test_resolve_voice() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(resolve_voice("Puck", &mut rng), "Puck");
        for _ in 0..20 {
            assert!(VOICE_NAMES.contains(&resolve_voice(RANDOM_VOICE, &mut rng).as_str()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_retries_then_succeeds() {
        let provider = FakeProvider { speech_failures: 1, ..Default::default() };
        let audio =
            synthesize_with_retry(&provider, "hi", "Kore", 2, Duration::from_millis(400)).await;
        assert_eq!(audio, ListeningAudio::Clip(STANDARD.encode("hi")));
        assert_eq!(provider.speech_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_falls_back_after_bounded_attempts() {
        let provider = FakeProvider { speech_failures: 5, ..Default::default() };
        let audio =
            synthesize_with_retry(&provider, "hi", "Kore", 2, Duration::from_millis(400)).await;
        assert!(matches!(audio, ListeningAudio::Fallback { ref message } if message.contains("503")));
        assert_eq!(provider.speech_calls.load(Ordering::SeqCst), 2);
    }
}
