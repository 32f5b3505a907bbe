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
        HistoryRecord,
        RecordId,
        SpeakerRole,
        SpeakingRecord,
        SpeakingStage,
        SpeakingTurn,
        TutorError,
    },
    store::LocalStore,
};

/// A live conversation practice. The record is upserted whole after every turn,
/// so the stored copy always holds the latest progress.
pub struct SpeakingSession {
    store: LocalStore,
    record: SpeakingRecord,
}

impl SpeakingSession {
    pub async fn start<R: Rng + ?Sized>(
        store: LocalStore,
        topic: &str,
        level: u32,
        now_ms: i64,
        rng: &mut R,
    ) -> Result<Self, TutorError> {
        let record = SpeakingRecord {
            id: RecordId::Text(practice_id(now_ms, rng)),
            created_at: Some(now_ms),
            date: display_date(now_ms),
            title: format!("Speaking: {topic}"),
            score: None,
            topic: topic.to_string(),
            level,
            entries: Vec::new(),
            started_at: now_ms,
            ended_at: None,
            duration_ms: None,
            record_stage: SpeakingStage::InProgress,
        };
        store.add_history(HistoryRecord::Speaking(record.clone())).await?;
        info!(id = %record.id, topic, level, "speaking session started");
        Ok(Self { store, record })
    }

    pub fn record(&self) -> &SpeakingRecord {
        &self.record
    }

    pub fn is_active(&self) -> bool {
        self.record.record_stage == SpeakingStage::InProgress
    }

    async fn commit(&mut self, next: SpeakingRecord) -> Result<(), TutorError> {
        self.store.add_history(HistoryRecord::Speaking(next.clone())).await?;
        self.record = next;
        Ok(())
    }

    pub async fn append_turn(
        &mut self,
        role: SpeakerRole,
        text: &str,
        at_ms: i64,
    ) -> Result<(), TutorError> {
        if !self.is_active() {
            return Err(TutorError::Custom("speaking session already finished".to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let mut next = self.record.clone();
        next.entries.push(SpeakingTurn { role, text: text.to_string(), at: at_ms });
        self.commit(next).await?;
        debug!(id = %self.record.id, turns = self.record.entries.len(), "speaking turn saved");
        Ok(())
    }

    /// Marks the session completed in a single upsert. Stop, back and error paths
    /// all end here; finishing twice keeps the first end time.
    pub async fn finish(&mut self, now_ms: i64) -> Result<&SpeakingRecord, TutorError> {
        if self.is_active() {
            let mut next = self.record.clone();
            next.ended_at = Some(now_ms);
            next.duration_ms = Some((now_ms - next.started_at).max(0));
            next.record_stage = SpeakingStage::Completed;
            self.commit(next).await?;
            info!(id = %self.record.id, turns = self.record.entries.len(), "speaking session finished");
        }
        Ok(&self.record)
    }
}
