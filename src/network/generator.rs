//! Question Generation
//!
//! The host obtains questions from an asynchronous content source. A source
//! either yields a validated [`Question`] or fails; failure never touches the
//! round.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::game::question::{AnswerOption, GradeGroup, Question, QuestionError};

/// Content source errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The source could not be reached or refused the request.
    #[error("Question source unavailable: {0}")]
    Unavailable(String),

    /// Payload was not the expected JSON shape.
    #[error("Malformed question payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload parsed but is not a usable question.
    #[error("Invalid question: {0}")]
    Invalid(#[from] QuestionError),

    /// Nothing available for the requested grade group.
    #[error("No questions for grade group {0}")]
    Exhausted(GradeGroup),
}

/// Asynchronous producer of questions for a grade group.
pub trait QuestionSource: Send + Sync {
    /// Produce one question for `grade`.
    fn generate(
        &self,
        grade: GradeGroup,
    ) -> impl Future<Output = Result<Question, GenerateError>> + Send;
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Question as returned by the authoring service. The grade group is not part
/// of the payload; it is whatever was requested.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedPayload {
    text: String,
    options: Vec<AnswerOption>,
    correct_answer_id: String,
}

/// Parse and validate a generated question payload:
///
/// ```json
/// {"text": "...", "options": [{"id": "A", "text": "..."}], "correctAnswerId": "A"}
/// ```
pub fn parse_generated_question(json: &str, grade: GradeGroup) -> Result<Question, GenerateError> {
    let payload: GeneratedPayload = serde_json::from_str(json)?;
    let question = Question {
        text: payload.text.trim().to_string(),
        options: payload.options,
        correct_answer_id: payload.correct_answer_id,
        grade_group: grade,
    };
    question.validate()?;
    Ok(question)
}

// =============================================================================
// QUESTION BANK
// =============================================================================

#[derive(Debug, Default)]
struct Shelf {
    questions: Vec<Question>,
    next: AtomicUsize,
}

/// Canned questions, handed out round-robin per grade group.
#[derive(Debug, Default)]
pub struct QuestionBank {
    shelves: BTreeMap<GradeGroup, Shelf>,
}

impl QuestionBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bank from questions, dropping any that fail validation.
    pub fn from_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let mut bank = Self::new();
        for question in questions {
            if let Err(e) = bank.insert(question) {
                warn!("Skipping question: {}", e);
            }
        }
        bank
    }

    /// Load a JSON array of questions.
    ///
    /// Each entry uses the payload shape plus a `gradeGroup` label.
    pub fn from_json(json: &str) -> Result<Self, GenerateError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Entry {
            grade_group: GradeGroup,
            #[serde(flatten)]
            payload: GeneratedPayload,
        }

        let entries: Vec<Entry> = serde_json::from_str(json)?;
        let mut bank = Self::new();
        for entry in entries {
            bank.insert(Question {
                text: entry.payload.text,
                options: entry.payload.options,
                correct_answer_id: entry.payload.correct_answer_id,
                grade_group: entry.grade_group,
            })?;
        }
        debug!(questions = bank.len(), "Question bank loaded");
        Ok(bank)
    }

    /// Add a question after validating it.
    pub fn insert(&mut self, question: Question) -> Result<(), QuestionError> {
        question.validate()?;
        self.shelves
            .entry(question.grade_group)
            .or_default()
            .questions
            .push(question);
        Ok(())
    }

    /// Total questions held.
    pub fn len(&self) -> usize {
        self.shelves.values().map(|s| s.questions.len()).sum()
    }

    /// Whether the bank holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next question for `grade`, cycling through that grade's shelf.
    pub fn next_for(&self, grade: GradeGroup) -> Option<Question> {
        let shelf = self.shelves.get(&grade)?;
        if shelf.questions.is_empty() {
            return None;
        }
        let index = shelf.next.fetch_add(1, Ordering::Relaxed) % shelf.questions.len();
        Some(shelf.questions[index].clone())
    }
}

impl QuestionSource for QuestionBank {
    async fn generate(&self, grade: GradeGroup) -> Result<Question, GenerateError> {
        self.next_for(grade).ok_or(GenerateError::Exhausted(grade))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::question::tests::sample_question;

    const PAYLOAD: &str = r#"{
        "text": "  What is 7 x 8?  ",
        "options": [
            {"id": "A", "text": "54"},
            {"id": "B", "text": "56"},
            {"id": "C", "text": "58"},
            {"id": "D", "text": "64"}
        ],
        "correctAnswerId": "B"
    }"#;

    #[test]
    fn test_parse_generated_question() {
        let q = parse_generated_question(PAYLOAD, GradeGroup::Grades3To4).unwrap();
        assert_eq!(q.text, "What is 7 x 8?");
        assert_eq!(q.grade_group, GradeGroup::Grades3To4);
        assert_eq!(q.correct_option_text(), "56");
    }

    #[test]
    fn test_parse_rejects_unknown_correct_answer() {
        let json = PAYLOAD.replace(r#""correctAnswerId": "B""#, r#""correctAnswerId": "E""#);
        let err = parse_generated_question(&json, GradeGroup::Grade9).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Invalid(QuestionError::UnknownCorrectAnswer(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_generated_question("not json", GradeGroup::Grade9).unwrap_err();
        assert!(matches!(err, GenerateError::Malformed(_)));
    }

    #[test]
    fn test_bank_rotates_per_grade() {
        let mut second = sample_question(GradeGroup::Grades1To2);
        second.text = "Second".to_string();
        let bank = QuestionBank::from_questions([sample_question(GradeGroup::Grades1To2), second]);

        let texts: Vec<_> = (0..3)
            .map(|_| bank.next_for(GradeGroup::Grades1To2).unwrap().text)
            .collect();
        assert_eq!(texts[0], texts[2]);
        assert_ne!(texts[0], texts[1]);
        assert!(bank.next_for(GradeGroup::Grade9).is_none());
    }

    #[test]
    fn test_bank_skips_invalid_questions() {
        let mut broken = sample_question(GradeGroup::Grades5To6);
        broken.options.pop();
        let bank = QuestionBank::from_questions([broken, sample_question(GradeGroup::Grades5To6)]);
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_bank_from_json() {
        let json = r#"[{
            "gradeGroup": "7-8",
            "text": "Chemical symbol for gold?",
            "options": [
                {"id": "A", "text": "Ag"},
                {"id": "B", "text": "Au"},
                {"id": "C", "text": "Gd"},
                {"id": "D", "text": "Go"}
            ],
            "correctAnswerId": "B"
        }]"#;
        let bank = QuestionBank::from_json(json).unwrap();
        assert_eq!(bank.len(), 1);
        let q = bank.next_for(GradeGroup::Grades7To8).unwrap();
        assert_eq!(q.correct_option_text(), "Au");
    }

    #[tokio::test]
    async fn test_empty_grade_is_an_error() {
        let bank = QuestionBank::new();
        let err = bank.generate(GradeGroup::Grades3To4).await.unwrap_err();
        assert!(matches!(err, GenerateError::Exhausted(GradeGroup::Grades3To4)));
    }
}
