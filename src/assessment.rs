// Deterministic scoring for quiz attempts.

use std::collections::HashMap;

use crate::error::ApiError;
use crate::models::QuizQuestion;

/// Service-wide pass mark. Configurable policy, default 60 percent.
pub const DEFAULT_PASS_PERCENT: u32 = 60;

#[derive(Debug, Clone, Copy)]
pub struct PassPolicy {
    pub pass_percent: u32,
}

impl Default for PassPolicy {
    fn default() -> Self {
        PassPolicy {
            pass_percent: DEFAULT_PASS_PERCENT,
        }
    }
}

impl PassPolicy {
    /// Minimum correct answers to pass: ceil(pass_percent% of total).
    pub fn required_correct(&self, total: usize) -> usize {
        (total * self.pass_percent as usize).div_ceil(100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scored {
    pub score: usize,
    pub total: usize,
    pub passed: bool,
}

/// Pure scorer: identical (questions, answers) always yields an identical
/// result. Unanswered or mismatched questions count as incorrect.
pub fn score(
    questions: &[QuizQuestion],
    answers: &HashMap<usize, usize>,
    policy: PassPolicy,
) -> Scored {
    let total = questions.len();
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(i, q)| answers.get(i) == Some(&(q.correct_index as usize)))
        .count();
    Scored {
        score: correct,
        total,
        passed: correct >= policy.required_correct(total),
    }
}

/// Structural validation: at least one question, each with two or more
/// options and an in-range correct index.
pub fn validate_questions(questions: &[QuizQuestion]) -> Result<(), ApiError> {
    if questions.is_empty() {
        return Err(ApiError::Validation("quiz has no questions".into()));
    }
    for (i, q) in questions.iter().enumerate() {
        if q.options.len() < 2 {
            return Err(ApiError::Validation(format!(
                "question {} has fewer than 2 options",
                i
            )));
        }
        if q.correct_index < 0 || q.correct_index as usize >= q.options.len() {
            return Err(ApiError::Validation(format!(
                "question {} has an out-of-range correct index",
                i
            )));
        }
    }
    Ok(())
}

/// Boundary check before scoring: every question answered, every chosen
/// option in range. The scorer itself never rejects.
pub fn validate_attempt(
    questions: &[QuizQuestion],
    answers: &HashMap<usize, usize>,
) -> Result<(), ApiError> {
    for key in answers.keys() {
        if *key >= questions.len() {
            return Err(ApiError::Validation(format!(
                "answer references unknown question {}",
                key
            )));
        }
    }
    for (i, q) in questions.iter().enumerate() {
        match answers.get(&i) {
            None => {
                return Err(ApiError::IncompleteAttempt(format!(
                    "question {} is unanswered",
                    i
                )))
            }
            Some(&chosen) if chosen >= q.options.len() => {
                return Err(ApiError::Validation(format!(
                    "question {} answer is out of range",
                    i
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
