pub mod errors;
pub mod http;
pub mod models;
pub mod utils;

pub use errors::TutorError;
pub use models::{
    deserialize_history_lenient,
    parse_history,
    word_key,
    ArticleRecord,
    ExamQuestion,
    ExamRecord,
    ExamResult,
    ExamSection,
    ExamStage,
    Explanation,
    HistoryRecord,
    Phrase,
    RecordId,
    SavedWord,
    SectionScore,
    Segment,
    SpeakerRole,
    SpeakingRecord,
    SpeakingStage,
    SpeakingTurn,
    StudyContent,
    WordCard,
    WrongItem,
};
