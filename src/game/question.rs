//! Question Definitions
//!
//! A question is set once per round by the host and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Options per question produced by the content generator.
pub const OPTIONS_PER_QUESTION: usize = 4;

// =============================================================================
// GRADE GROUP
// =============================================================================

/// School grade band a question is written for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GradeGroup {
    /// Grades 1 and 2.
    #[serde(rename = "1-2")]
    Grades1To2,
    /// Grades 3 and 4.
    #[serde(rename = "3-4")]
    Grades3To4,
    /// Grades 5 and 6.
    #[serde(rename = "5-6")]
    Grades5To6,
    /// Grades 7 and 8.
    #[serde(rename = "7-8")]
    Grades7To8,
    /// Grade 9.
    #[serde(rename = "9")]
    Grade9,
}

impl GradeGroup {
    /// Every grade group, youngest first.
    pub const ALL: [GradeGroup; 5] = [
        GradeGroup::Grades1To2,
        GradeGroup::Grades3To4,
        GradeGroup::Grades5To6,
        GradeGroup::Grades7To8,
        GradeGroup::Grade9,
    ];

    /// Wire label ("1-2", "3-4", ...).
    pub fn label(self) -> &'static str {
        match self {
            GradeGroup::Grades1To2 => "1-2",
            GradeGroup::Grades3To4 => "3-4",
            GradeGroup::Grades5To6 => "5-6",
            GradeGroup::Grades7To8 => "7-8",
            GradeGroup::Grade9 => "9",
        }
    }

    /// Stable index, used when hashing.
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GradeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GradeGroup {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GradeGroup::ALL
            .into_iter()
            .find(|g| g.label() == s.trim())
            .ok_or_else(|| QuestionError::UnknownGradeGroup(s.to_string()))
    }
}

// =============================================================================
// QUESTION
// =============================================================================

/// One selectable answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    /// Option id, "A".."D" by convention.
    pub id: String,
    /// Displayed text.
    pub text: String,
}

impl AnswerOption {
    /// Create an option.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// A multiple-choice question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question text.
    pub text: String,
    /// Ordered answer options.
    pub options: Vec<AnswerOption>,
    /// Id of the correct option.
    pub correct_answer_id: String,
    /// Grade band.
    pub grade_group: GradeGroup,
}

impl Question {
    /// Whether `answer_id` is the correct answer.
    #[inline]
    pub fn is_correct(&self, answer_id: &str) -> bool {
        self.correct_answer_id == answer_id
    }

    /// Look up an option by id.
    pub fn option(&self, id: &str) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// Text of the correct option, or its bare id when no option carries it.
    pub fn correct_option_text(&self) -> &str {
        self.option(&self.correct_answer_id)
            .map(|o| o.text.as_str())
            .unwrap_or(&self.correct_answer_id)
    }

    /// Check the shape a generated question must have before it is used.
    ///
    /// The round machine itself accepts any question; this is applied to
    /// payloads coming from the content generator.
    pub fn validate(&self) -> Result<(), QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }

        if self.options.len() != OPTIONS_PER_QUESTION {
            return Err(QuestionError::WrongOptionCount(self.options.len()));
        }

        for (i, option) in self.options.iter().enumerate() {
            if self.options[..i].iter().any(|o| o.id == option.id) {
                return Err(QuestionError::DuplicateOptionId(option.id.clone()));
            }
        }

        if self.option(&self.correct_answer_id).is_none() {
            return Err(QuestionError::UnknownCorrectAnswer(self.correct_answer_id.clone()));
        }

        Ok(())
    }
}

/// Question validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuestionError {
    /// Question text is blank.
    #[error("Question text is empty")]
    EmptyText,

    /// Not exactly four options.
    #[error("Expected 4 options, got {0}")]
    WrongOptionCount(usize),

    /// Two options share an id.
    #[error("Duplicate option id {0:?}")]
    DuplicateOptionId(String),

    /// Correct answer id matches no option.
    #[error("Correct answer {0:?} is not one of the options")]
    UnknownCorrectAnswer(String),

    /// Grade label not recognised.
    #[error("Unknown grade group {0:?}")]
    UnknownGradeGroup(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four-option question with "B" correct.
    pub(crate) fn sample_question(grade: GradeGroup) -> Question {
        Question {
            text: "Which planet is known as the Red Planet?".to_string(),
            options: vec![
                AnswerOption::new("A", "Venus"),
                AnswerOption::new("B", "Mars"),
                AnswerOption::new("C", "Jupiter"),
                AnswerOption::new("D", "Saturn"),
            ],
            correct_answer_id: "B".to_string(),
            grade_group: grade,
        }
    }

    #[test]
    fn test_grade_group_labels_roundtrip() {
        for grade in GradeGroup::ALL {
            assert_eq!(grade.label().parse::<GradeGroup>().unwrap(), grade);
        }
        assert!("10".parse::<GradeGroup>().is_err());
    }

    #[test]
    fn test_grade_group_serializes_as_label() {
        let json = serde_json::to_string(&GradeGroup::Grades3To4).unwrap();
        assert_eq!(json, "\"3-4\"");
    }

    #[test]
    fn test_correct_option_text() {
        let mut q = sample_question(GradeGroup::Grade9);
        assert_eq!(q.correct_option_text(), "Mars");

        q.correct_answer_id = "E".to_string();
        assert_eq!(q.correct_option_text(), "E");
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(sample_question(GradeGroup::Grades1To2).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut q = sample_question(GradeGroup::Grades1To2);
        q.options.pop();
        assert_eq!(q.validate(), Err(QuestionError::WrongOptionCount(3)));

        let mut q = sample_question(GradeGroup::Grades1To2);
        q.correct_answer_id = "Z".to_string();
        assert!(matches!(q.validate(), Err(QuestionError::UnknownCorrectAnswer(_))));

        let mut q = sample_question(GradeGroup::Grades1To2);
        q.options[3].id = "A".to_string();
        assert_eq!(q.validate(), Err(QuestionError::DuplicateOptionId("A".to_string())));

        let mut q = sample_question(GradeGroup::Grades1To2);
        q.text = "   ".to_string();
        assert_eq!(q.validate(), Err(QuestionError::EmptyText));
    }

    #[test]
    fn test_option_ids_are_not_forced_to_letters() {
        let mut q = sample_question(GradeGroup::Grades5To6);
        for (i, option) in q.options.iter_mut().enumerate() {
            option.id = format!("opt-{i}");
        }
        q.correct_answer_id = "opt-2".to_string();
        assert!(q.validate().is_ok());
    }
}
