use rand::{
    seq::{
        IndexedRandom,
        SliceRandom,
    },
    Rng,
};

use crate::core::SavedWord;

pub const LISTEN_LABELS: [&str; 3] = ["A", "B", "C"];
const PLACEHOLDER_CLIPS: [&str; 2] = ["example", "sample"];
const DISTRACTORS_PER_QUESTION: usize = 2;

/// What a question tests. Every word gets one question per modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Meaning,
    Recall,
    Listening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizKind {
    /// Headword shown and spoken; pick the translation.
    MeaningChoice,
    /// Translation shown; pick the headword.
    RecallChoice,
    /// Headword only spoken; pick the translation.
    ListenMeaning,
    /// Translation shown; three labelled clips played, pick the label of the headword.
    ListenPick,
}

impl QuizKind {
    pub fn modality(&self) -> Modality {
        match self {
            QuizKind::MeaningChoice => Modality::Meaning,
            QuizKind::RecallChoice => Modality::Recall,
            QuizKind::ListenMeaning | QuizKind::ListenPick => Modality::Listening,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizItem {
    pub word_id: String,
    pub kind: QuizKind,
    /// Text displayed with the question. Empty when the question is audio only.
    pub prompt: String,
    /// Text read aloud when the question appears.
    pub speak: Option<String>,
    pub options: Vec<String>,
    pub correct: String,
    /// For [`QuizKind::ListenPick`], the text behind each labelled option.
    pub clips: Vec<String>,
}

impl QuizItem {
    /// Compares option text, so a distractor that happens to share the correct
    /// text also counts as correct.
    pub fn is_correct(&self, choice: usize) -> bool {
        self.options.get(choice).is_some_and(|option| *option == self.correct)
    }

    pub fn modality(&self) -> Modality {
        self.kind.modality()
    }
}

/// Up to two other words from `pool`, chosen uniformly without replacement.
/// Never returns `target` itself.
pub fn pick_distractor_words<'a, R: Rng + ?Sized>(
    target: &SavedWord,
    pool: &'a [SavedWord],
    rng: &mut R,
) -> Vec<&'a SavedWord> {
    let others: Vec<&SavedWord> = pool.iter().filter(|w| w.id != target.id).collect();
    others.choose_multiple(rng, DISTRACTORS_PER_QUESTION).copied().collect()
}

fn choice_item<R: Rng + ?Sized>(
    word: &SavedWord,
    pool: &[SavedWord],
    kind: QuizKind,
    rng: &mut R,
) -> QuizItem {
    let recall = kind == QuizKind::RecallChoice;
    let field = |w: &SavedWord| if recall { w.headword.clone() } else { w.translation.clone() };

    let correct = field(word);
    let mut options = vec![correct.clone()];
    options.extend(pick_distractor_words(word, pool, rng).into_iter().map(field));
    options.shuffle(rng);

    let (prompt, speak) = match kind {
        QuizKind::MeaningChoice => (word.headword.clone(), Some(word.headword.clone())),
        QuizKind::RecallChoice => (word.translation.clone(), None),
        _ => (String::new(), Some(word.headword.clone())),
    };

    QuizItem { word_id: word.id.clone(), kind, prompt, speak, options, correct, clips: Vec::new() }
}

fn listen_pick_item<R: Rng + ?Sized>(word: &SavedWord, pool: &[SavedWord], rng: &mut R) -> QuizItem {
    let distractors = pick_distractor_words(word, pool, rng);
    let mut choices: Vec<(String, bool)> = vec![(word.headword.clone(), true)];
    for (i, placeholder) in PLACEHOLDER_CLIPS.iter().enumerate() {
        let text = distractors
            .get(i)
            .map(|w| w.headword.clone())
            .unwrap_or_else(|| placeholder.to_string());
        choices.push((text, false));
    }
    choices.shuffle(rng);

    let correct_index = choices.iter().position(|(_, is_target)| *is_target).unwrap_or(0);
    QuizItem {
        word_id: word.id.clone(),
        kind: QuizKind::ListenPick,
        prompt: word.translation.clone(),
        speak: None,
        options: LISTEN_LABELS.iter().map(|l| l.to_string()).collect(),
        correct: LISTEN_LABELS[correct_index].to_string(),
        clips: choices.into_iter().map(|(text, _)| text).collect(),
    }
}

/// The three questions for one word: meaning, recall, and one of the two listening variants.
pub fn build_word_items<R: Rng + ?Sized>(
    word: &SavedWord,
    pool: &[SavedWord],
    rng: &mut R,
) -> Vec<QuizItem> {
    let listening = if rng.random_bool(0.5) {
        choice_item(word, pool, QuizKind::ListenMeaning, rng)
    } else {
        listen_pick_item(word, pool, rng)
    };
    vec![
        choice_item(word, pool, QuizKind::MeaningChoice, rng),
        choice_item(word, pool, QuizKind::RecallChoice, rng),
        listening,
    ]
}

#[cfg(test)]
mod tests {
    use rand::{
        rngs::StdRng,
        SeedableRng,
    };

    use super::*;

    fn sample_word(id: &str) -> SavedWord {
        SavedWord {
            id: id.to_string(),
            headword: id.to_string(),
            translation: format!("{id}-zh"),
            part_of_speech: String::new(),
            ipa: String::new(),
            example: String::new(),
            example_translation: String::new(),
            created_at: 0,
            next_review: 0,
            level: 0,
        }
    }

    fn pool() -> Vec<SavedWord> {
        ["invoice", "ledger", "audit", "merger", "tariff"].iter().map(|w| sample_word(w)).collect()
    }

    #[test]
    fn test_distractors_exclude_target() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let picked = pick_distractor_words(&pool[0], &pool, &mut rng);
            assert_eq!(picked.len(), 2);
            assert!(picked.iter().all(|w| w.id != "invoice"));
            assert_ne!(picked[0].id, picked[1].id);
        }
    }

    #[test]
    fn test_word_items_cover_each_modality_once() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(2);
        for word in &pool {
            let items = build_word_items(word, &pool, &mut rng);
            let modalities: Vec<Modality> = items.iter().map(|i| i.modality()).collect();
            assert_eq!(modalities, vec![Modality::Meaning, Modality::Recall, Modality::Listening]);
            for item in &items {
                assert_eq!(item.options.len(), 3);
                assert_eq!(item.options.iter().filter(|o| **o == item.correct).count(), 1);
            }
        }
    }

    #[test]
    fn test_choice_options_hold_target_field() {
        let pool = pool();
        let mut rng = StdRng::seed_from_u64(3);
        let meaning = choice_item(&pool[1], &pool, QuizKind::MeaningChoice, &mut rng);
        assert_eq!(meaning.correct, "ledger-zh");
        assert!(meaning.options.iter().all(|o| o.ends_with("-zh")));

        let recall = choice_item(&pool[1], &pool, QuizKind::RecallChoice, &mut rng);
        assert_eq!(recall.correct, "ledger");
        assert_eq!(recall.prompt, "ledger-zh");
        assert!(recall.options.iter().all(|o| !o.ends_with("-zh")));
    }

    #[test]
    fn test_listen_pick_uses_placeholders_when_pool_is_small() {
        let pool = vec![sample_word("only")];
        let mut rng = StdRng::seed_from_u64(4);
        let item = listen_pick_item(&pool[0], &pool, &mut rng);

        assert_eq!(item.options, vec!["A", "B", "C"]);
        let mut clips = item.clips.clone();
        clips.sort();
        assert_eq!(clips, vec!["example", "only", "sample"]);

        let label_index = LISTEN_LABELS.iter().position(|l| *l == item.correct).unwrap();
        assert_eq!(item.clips[label_index], "only");
        assert!(item.is_correct(label_index));
    }

    #[test]
    fn test_duplicate_distractor_text_is_accepted() {
        let mut pool = pool();
        pool[1].translation = "invoice-zh".to_string();
        pool.truncate(2);
        let mut rng = StdRng::seed_from_u64(5);
        let item = choice_item(&pool[0], &pool, QuizKind::MeaningChoice, &mut rng);
        assert_eq!(item.options.len(), 2);
        assert!(item.options.iter().all(|o| o == "invoice-zh"));
        assert!(item.is_correct(0) && item.is_correct(1));
    }
}
