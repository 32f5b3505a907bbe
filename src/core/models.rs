use std::{
    collections::BTreeMap,
    fmt,
};

use serde::{
    Deserialize,
    Deserializer,
    Serialize,
};
use serde_json::Value;
use tracing::warn;

/// A vocabulary entry tracked by the spaced-repetition scheduler.
///
/// Identity is the lowercased headword. Field names on the wire follow the
/// backup format (`en`, `zh`, `ex_zh`, `createdAt`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedWord {
    pub id: String,
    #[serde(rename = "en")]
    pub headword: String,
    #[serde(rename = "zh", default)]
    pub translation: String,
    #[serde(rename = "pos", default)]
    pub part_of_speech: String,
    #[serde(default)]
    pub ipa: String,
    #[serde(rename = "ex", default)]
    pub example: String,
    #[serde(rename = "ex_zh", default)]
    pub example_translation: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "nextReview", default)]
    pub next_review: i64,
    #[serde(default)]
    pub level: u32,
}

impl SavedWord {
    pub fn from_card(card: &WordCard, fallback_word: &str, created_at: i64, next_review: i64) -> Self {
        let headword = if card.word.trim().is_empty() { fallback_word } else { card.word.as_str() };
        Self {
            id: word_key(fallback_word),
            headword: headword.to_string(),
            translation: card.def.clone(),
            part_of_speech: card.pos.clone(),
            ipa: card.ipa.clone(),
            example: card.ex.clone(),
            example_translation: card.ex_zh.clone(),
            created_at,
            next_review,
            level: 0,
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_review <= now_ms
    }
}

/// Lowercased lookup key shared by the word cache and the saved-word collection.
pub fn word_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// AI word lookup result, also the vocabulary item shape inside generated articles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordCard {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub ipa: String,
    #[serde(default)]
    pub def: String,
    #[serde(default)]
    pub ex: String,
    #[serde(default)]
    pub ex_zh: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub en: String,
    #[serde(default)]
    pub zh: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    pub phrase: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub example_zh: String,
}

/// Generated reading passage with its vocabulary and phrase notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyContent {
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub vocabulary: Vec<WordCard>,
    #[serde(default)]
    pub phrases: Vec<Phrase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl StudyContent {
    /// Joins the segments into the full passage and its translation.
    pub fn fill_derived_text(&mut self) {
        if self.segments.is_empty() {
            return;
        }
        self.article = Some(self.segments.iter().map(|s| s.en.as_str()).collect::<Vec<_>>().join(" "));
        self.translation =
            Some(self.segments.iter().map(|s| s.zh.as_str()).collect::<Vec<_>>().join("\n"));
    }

    pub fn article_text(&self) -> String {
        match &self.article {
            Some(article) => article.clone(),
            None => self.segments.iter().map(|s| s.en.as_str()).collect::<Vec<_>>().join(" "),
        }
    }

    pub fn find_vocabulary(&self, word: &str) -> Option<&WordCard> {
        let key = word_key(word);
        self.vocabulary.iter().find(|v| word_key(&v.word) == key)
    }
}

/// History record id. Articles use epoch-millisecond numbers, practice records use
/// `"{epoch-ms}-{suffix}"` strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Numeric(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Numeric(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

/// A history entry, tagged by `type` on the wire. Entries written before the
/// tag existed carry none and read as articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "Value")]
pub enum HistoryRecord {
    Article(ArticleRecord),
    Exam(ExamRecord),
    Speaking(SpeakingRecord),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedRecord {
    Article(ArticleRecord),
    Exam(ExamRecord),
    Speaking(SpeakingRecord),
}

impl TryFrom<Value> for HistoryRecord {
    type Error = serde_json::Error;

    fn try_from(mut value: Value) -> Result<Self, Self::Error> {
        if let Value::Object(fields) = &mut value {
            if fields.get("type").map_or(true, Value::is_null) {
                fields.insert("type".to_string(), Value::from("article"));
            }
        }
        Ok(match serde_json::from_value(value)? {
            TaggedRecord::Article(r) => HistoryRecord::Article(r),
            TaggedRecord::Exam(r) => HistoryRecord::Exam(r),
            TaggedRecord::Speaking(r) => HistoryRecord::Speaking(r),
        })
    }
}

/// Parses entries one at a time. Entries that fit no record shape are logged
/// and dropped instead of failing the whole list.
pub fn parse_history(values: Vec<Value>) -> Vec<HistoryRecord> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match HistoryRecord::try_from(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, error = %e, "skipping unreadable history entry");
                None
            }
        })
        .collect()
}

/// `deserialize_with` helper for optional history sections.
pub fn deserialize_history_lenient<'de, D>(deserializer: D) -> Result<Option<Vec<HistoryRecord>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.map(parse_history))
}

impl HistoryRecord {
    pub fn id(&self) -> &RecordId {
        match self {
            HistoryRecord::Article(r) => &r.id,
            HistoryRecord::Exam(r) => &r.id,
            HistoryRecord::Speaking(r) => &r.id,
        }
    }

    pub fn created_at(&self) -> Option<i64> {
        match self {
            HistoryRecord::Article(r) => r.created_at,
            HistoryRecord::Exam(r) => r.created_at,
            HistoryRecord::Speaking(r) => r.created_at,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            HistoryRecord::Article(r) => &r.title,
            HistoryRecord::Exam(r) => &r.title,
            HistoryRecord::Speaking(r) => &r.title,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HistoryRecord::Article(_) => "article",
            HistoryRecord::Exam(_) => "exam",
            HistoryRecord::Speaking(_) => "speaking",
        }
    }

    /// Copy with cached audio removed, as sent to the cloud backup.
    pub fn without_audio(&self) -> Self {
        let mut light = self.clone();
        match &mut light {
            HistoryRecord::Article(r) => r.audio = None,
            HistoryRecord::Exam(r) => r.listening_audio = None,
            HistoryRecord::Speaking(_) => {}
        }
        light
    }

    pub fn as_article(&self) -> Option<&ArticleRecord> {
        match self {
            HistoryRecord::Article(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    pub data: StudyContent,
    /// Base64 PCM audio for the passage. Null in cloud backups.
    #[serde(default)]
    pub audio: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExamStage {
    #[serde(rename = "exam_generated")]
    Generated,
    #[serde(rename = "exam_submitted")]
    Submitted,
    #[serde(rename = "exam_explained")]
    Explained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamSection {
    Listening,
    Reading,
    Vocabulary,
    Grammar,
}

impl ExamSection {
    pub const ALL: [ExamSection; 4] =
        [ExamSection::Listening, ExamSection::Reading, ExamSection::Vocabulary, ExamSection::Grammar];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExamSection::Listening => "listening",
            ExamSection::Reading => "reading",
            ExamSection::Vocabulary => "vocabulary",
            ExamSection::Grammar => "grammar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuestion {
    pub id: String,
    pub section: ExamSection,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub passage: String,
    #[serde(default)]
    pub audio_text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub explanation_seed: String,
}

impl ExamQuestion {
    pub fn spoken_text(&self) -> &str {
        if self.audio_text.trim().is_empty() {
            &self.question
        } else {
            &self.audio_text
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub total: u32,
    pub correct: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongItem {
    pub id: String,
    pub section: ExamSection,
    pub question: String,
    pub selected: String,
    pub answer: String,
    #[serde(default)]
    pub explanation_seed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub total: u32,
    pub correct: u32,
    pub wrong_count: u32,
    pub by_section: BTreeMap<ExamSection, SectionScore>,
    pub wrong_items: Vec<WrongItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub id: String,
    #[serde(default)]
    pub why_wrong: String,
    #[serde(default)]
    pub key_point: String,
    #[serde(default)]
    pub trap: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: RecordId,
    pub attempt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: Option<u32>,
    pub record_stage: ExamStage,
    #[serde(default)]
    pub questions: Vec<ExamQuestion>,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub result: Option<ExamResult>,
    #[serde(default)]
    pub explanations: Vec<Explanation>,
    /// Base64 clips keyed by `{question id}:{voice}`. Null in cloud backups.
    #[serde(default)]
    pub listening_audio: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpeakingStage {
    #[serde(rename = "speaking_in_progress")]
    InProgress,
    #[serde(rename = "speaking_completed")]
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    System,
    Ai,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingTurn {
    pub role: SpeakerRole,
    pub text: String,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: Option<u32>,
    pub topic: String,
    pub level: u32,
    #[serde(default)]
    pub entries: Vec<SpeakingTurn>,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub record_stage: SpeakingStage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_record_wire_shape() {
        let record = HistoryRecord::Article(ArticleRecord {
            id: RecordId::Numeric(1_700_000_000_000),
            created_at: None,
            date: "2024/1/1".to_string(),
            title: "Quarterly results...".to_string(),
            score: Some(700),
            voice: Some("Kore".to_string()),
            topic: None,
            data: StudyContent {
                segments: vec![Segment { en: "Hello.".to_string(), zh: "你好。".to_string() }],
                vocabulary: Vec::new(),
                phrases: Vec::new(),
                article: None,
                translation: None,
            },
            audio: Some("AAAA".to_string()),
        });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "article");
        assert_eq!(json["id"], 1_700_000_000_000i64);
        assert_eq!(json["audio"], "AAAA");

        let light = serde_json::to_value(record.without_audio()).unwrap();
        assert!(light["audio"].is_null());
    }

    #[test]
    fn test_untagged_entry_reads_as_article() {
        let legacy = serde_json::json!({
            "id": 1_690_000_000_000i64,
            "date": "2023/7/22",
            "title": "Office move...",
            "data": { "article": "We are moving." }
        });
        let record: HistoryRecord = serde_json::from_value(legacy).unwrap();
        assert_eq!(record.kind(), "article");
        assert_eq!(record.id(), &RecordId::Numeric(1_690_000_000_000));

        let roundtrip = serde_json::to_value(&record).unwrap();
        assert_eq!(roundtrip["type"], "article");
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let values = vec![
            serde_json::json!({ "type": "article", "id": 1, "data": {} }),
            serde_json::json!({ "type": "flashcards", "id": 2 }),
            serde_json::json!("not a record"),
            serde_json::json!({ "id": 3, "data": {} }),
        ];
        let records = parse_history(values);
        let ids: Vec<&RecordId> = records.iter().map(HistoryRecord::id).collect();
        assert_eq!(ids, vec![&RecordId::Numeric(1), &RecordId::Numeric(3)]);
    }

    #[test]
    fn test_exam_stage_names_and_order() {
        assert_eq!(serde_json::to_value(ExamStage::Submitted).unwrap(), "exam_submitted");
        assert!(ExamStage::Generated < ExamStage::Submitted);
        assert!(ExamStage::Submitted < ExamStage::Explained);
    }

    #[test]
    fn test_saved_word_reads_legacy_fields() {
        let json = serde_json::json!({
            "id": "negotiate",
            "en": "negotiate",
            "zh": "談判",
            "createdAt": 1,
            "nextReview": 2,
            "level": 2
        });
        let word: SavedWord = serde_json::from_value(json).unwrap();
        assert_eq!(word.headword, "negotiate");
        assert_eq!(word.translation, "談判");
        assert_eq!(word.example, "");
        assert_eq!(word.level, 2);
    }

    #[test]
    fn test_fill_derived_text() {
        let mut content = StudyContent {
            segments: vec![
                Segment { en: "One.".to_string(), zh: "一。".to_string() },
                Segment { en: "Two.".to_string(), zh: "二。".to_string() },
            ],
            vocabulary: vec![WordCard { word: "Invoice".to_string(), ..Default::default() }],
            phrases: Vec::new(),
            article: None,
            translation: None,
        };
        content.fill_derived_text();
        assert_eq!(content.article.as_deref(), Some("One. Two."));
        assert_eq!(content.translation.as_deref(), Some("一。\n二。"));
        assert!(content.find_vocabulary("invoice").is_some());
    }
}
