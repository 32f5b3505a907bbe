use std::{
    collections::BTreeMap,
    time::Duration,
};

use rand::Rng;
use tracing::{
    debug,
    info,
};

use crate::{
    core::{
        utils::{
            display_date,
            practice_id,
        },
        ExamQuestion,
        ExamRecord,
        ExamResult,
        ExamSection,
        ExamStage,
        Explanation,
        HistoryRecord,
        RecordId,
        SectionScore,
        TutorError,
        WrongItem,
    },
    provider::{
        synthesize_with_retry,
        ContentProvider,
        GeneratedExam,
        ListeningAudio,
        WrongPayload,
        WrongPayloadItem,
    },
    store::LocalStore,
};

pub const QUESTIONS_PER_SECTION: usize = 3;
pub const MAX_OPTIONS: usize = 4;

/// Normalizes a generated exam into an ordered question list: at most three
/// questions per section (listening, reading, vocabulary, grammar), four options
/// each, and a generated id wherever the model left one out.
pub fn flatten_exam_questions<R: Rng + ?Sized>(
    exam: &GeneratedExam,
    now_ms: i64,
    rng: &mut R,
) -> Vec<ExamQuestion> {
    let mut questions = Vec::new();
    for section in ExamSection::ALL {
        for (index, raw) in exam.section(section).iter().take(QUESTIONS_PER_SECTION).enumerate() {
            let id = match raw.id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => format!("{}-{}-{}", section.as_str(), index + 1, practice_id(now_ms, rng)),
            };
            questions.push(ExamQuestion {
                id,
                section,
                question: raw.question.clone().unwrap_or_default(),
                passage: raw.passage.clone().unwrap_or_default(),
                audio_text: raw.audio_text.clone().unwrap_or_default(),
                options: raw
                    .options
                    .iter()
                    .flatten()
                    .take(MAX_OPTIONS)
                    .cloned()
                    .collect(),
                answer: raw.answer.clone().unwrap_or_default(),
                explanation_seed: raw.explanation_seed.clone().unwrap_or_default(),
            });
        }
    }
    questions
}

/// Scores answers against the key. An unanswered question counts as wrong.
pub fn grade_exam(questions: &[ExamQuestion], answers: &BTreeMap<String, String>) -> ExamResult {
    let mut by_section: BTreeMap<ExamSection, SectionScore> =
        ExamSection::ALL.iter().map(|s| (*s, SectionScore::default())).collect();
    let mut wrong_items = Vec::new();
    let mut correct = 0;

    for q in questions {
        let selected = answers.get(&q.id);
        let score = by_section.entry(q.section).or_default();
        score.total += 1;
        if selected.is_some_and(|s| *s == q.answer) {
            score.correct += 1;
            correct += 1;
        } else {
            wrong_items.push(WrongItem {
                id: q.id.clone(),
                section: q.section,
                question: q.question.clone(),
                selected: selected.cloned().unwrap_or_default(),
                answer: q.answer.clone(),
                explanation_seed: q.explanation_seed.clone(),
            });
        }
    }

    ExamResult {
        total: questions.len() as u32,
        correct,
        wrong_count: wrong_items.len() as u32,
        by_section,
        wrong_items,
    }
}

pub fn build_wrong_payload(target_score: u32, wrong_items: &[WrongItem]) -> WrongPayload {
    WrongPayload {
        target_score,
        wrong_items: wrong_items
            .iter()
            .map(|item| WrongPayloadItem {
                id: item.id.clone(),
                section: item.section,
                question: item.question.clone(),
                selected: item.selected.clone(),
                answer: item.answer.clone(),
                hint: item.explanation_seed.clone(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplainedItem {
    pub item: WrongItem,
    pub explanation: Option<Explanation>,
}

/// Pairs each wrong item with the explanation carrying its id, if any.
pub fn merge_explanations(
    wrong_items: &[WrongItem],
    explanations: &[Explanation],
) -> Vec<ExplainedItem> {
    wrong_items
        .iter()
        .map(|item| ExplainedItem {
            item: item.clone(),
            explanation: explanations.iter().find(|e| e.id == item.id).cloned(),
        })
        .collect()
}

fn audio_key(question_id: &str, voice: &str) -> String {
    format!("{question_id}:{voice}")
}

/// One exam sitting. Every change is written as a whole-record upsert built from
/// the current in-memory record, and is only kept in memory once the write succeeds.
pub struct ExamAttempt {
    store: LocalStore,
    record: ExamRecord,
}

impl ExamAttempt {
    pub async fn start<R: Rng + ?Sized>(
        store: LocalStore,
        questions: Vec<ExamQuestion>,
        target_score: u32,
        now_ms: i64,
        rng: &mut R,
    ) -> Result<Self, TutorError> {
        if questions.is_empty() {
            return Err(TutorError::ContentFormat("generated exam has no questions".to_string()));
        }
        let record = ExamRecord {
            id: RecordId::Text(practice_id(now_ms, rng)),
            attempt_id: practice_id(now_ms, rng),
            created_at: Some(now_ms),
            date: display_date(now_ms),
            title: format!("TOEIC {target_score} mock exam"),
            score: Some(target_score),
            record_stage: ExamStage::Generated,
            questions,
            answers: BTreeMap::new(),
            result: None,
            explanations: Vec::new(),
            listening_audio: None,
        };
        store.add_history(HistoryRecord::Exam(record.clone())).await?;
        info!(id = %record.id, questions = record.questions.len(), "exam attempt started");
        Ok(Self { store, record })
    }

    /// Continues an attempt loaded from history.
    pub fn resume(store: LocalStore, record: ExamRecord) -> Self {
        Self { store, record }
    }

    pub fn record(&self) -> &ExamRecord {
        &self.record
    }

    pub fn stage(&self) -> ExamStage {
        self.record.record_stage
    }

    pub fn result(&self) -> Option<&ExamResult> {
        self.record.result.as_ref()
    }

    async fn commit(&mut self, next: ExamRecord) -> Result<(), TutorError> {
        self.store.add_history(HistoryRecord::Exam(next.clone())).await?;
        self.record = next;
        Ok(())
    }

    pub async fn record_answer(&mut self, question_id: &str, option: &str) -> Result<(), TutorError> {
        if self.stage() != ExamStage::Generated {
            return Err(TutorError::Custom("exam already submitted".to_string()));
        }
        if !self.record.questions.iter().any(|q| q.id == question_id) {
            return Err(TutorError::Custom(format!("unknown exam question '{question_id}'")));
        }
        let mut next = self.record.clone();
        next.answers.insert(question_id.to_string(), option.to_string());
        self.commit(next).await
    }

    /// Audio for a listening question, cached on the record per question and voice.
    /// A successful synthesis is persisted; a fallback result is not.
    pub async fn listening_audio(
        &mut self,
        provider: &dyn ContentProvider,
        question_id: &str,
        voice: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<ListeningAudio, TutorError> {
        let key = audio_key(question_id, voice);
        if let Some(clip) = self.record.listening_audio.as_ref().and_then(|cache| cache.get(&key)) {
            return Ok(ListeningAudio::Clip(clip.clone()));
        }
        let text = self
            .record
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .map(|q| q.spoken_text().to_string())
            .ok_or_else(|| TutorError::Custom(format!("unknown exam question '{question_id}'")))?;

        let audio = synthesize_with_retry(provider, &text, voice, attempts, delay).await;
        if let ListeningAudio::Clip(clip) = &audio {
            let mut next = self.record.clone();
            next.listening_audio.get_or_insert_with(BTreeMap::new).insert(key, clip.clone());
            self.commit(next).await?;
        }
        Ok(audio)
    }

    /// Grades the answers and moves to the submitted stage. Calling it again
    /// returns the stored result.
    pub async fn submit(&mut self) -> Result<&ExamResult, TutorError> {
        if self.stage() == ExamStage::Generated || self.record.result.is_none() {
            let mut next = self.record.clone();
            next.result = Some(grade_exam(&next.questions, &next.answers));
            next.record_stage = next.record_stage.max(ExamStage::Submitted);
            self.commit(next).await?;
            debug!(id = %self.record.id, "exam submitted");
        }
        self.record
            .result
            .as_ref()
            .ok_or_else(|| TutorError::Custom("exam result missing after submit".to_string()))
    }

    /// Generates explanations for the wrong answers once per attempt. After the
    /// explained stage is reached, later calls return the stored explanations
    /// without calling the provider or writing.
    pub async fn explain(
        &mut self,
        provider: &dyn ContentProvider,
    ) -> Result<Vec<ExplainedItem>, TutorError> {
        let Some(result) = self.record.result.clone() else {
            return Err(TutorError::Custom("exam must be submitted before explaining".to_string()));
        };
        if self.stage() < ExamStage::Explained {
            let explanations = if result.wrong_items.is_empty() {
                Vec::new()
            } else {
                let payload =
                    build_wrong_payload(self.record.score.unwrap_or_default(), &result.wrong_items);
                let explanations = provider.generate_explanations(&payload).await?;
                if explanations.is_empty() {
                    return Err(TutorError::ContentFormat("no explanations were returned".to_string()));
                }
                explanations
            };

            let mut next = self.record.clone();
            next.explanations = explanations;
            next.record_stage = ExamStage::Explained;
            self.commit(next).await?;
            info!(id = %self.record.id, "exam explained");
        }
        Ok(merge_explanations(&result.wrong_items, &self.record.explanations))
    }
}
