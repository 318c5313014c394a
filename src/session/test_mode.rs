//! Test session
//!
//! One question per term; answers are collected locally and graded on
//! submit. A submitted round is final until `new_round` starts another.
//! Results stay local, so submitting has no saves to wait for.

use std::collections::HashMap;

use serde::Serialize;

use super::{answers_match, SessionCore, SessionError, SessionPhase};
use crate::hydrate::{SetData, StudyPreferences};
use crate::sets::{AnswerMode, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub term_id: String,
    pub prompt: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntry {
    pub term_id: String,
    pub prompt: String,
    pub expected: String,
    pub given: Option<String>,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub round: i32,
    pub score: usize,
    pub total: usize,
    pub entries: Vec<TestEntry>,
}

pub struct TestSession {
    core: SessionCore,
    terms: HashMap<String, Term>,
    answer_with: AnswerMode,
    questions: Vec<Question>,
    answers: HashMap<String, String>,
    result: Option<TestResult>,
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSession {
    pub fn new() -> Self {
        Self {
            core: SessionCore::new(),
            terms: HashMap::new(),
            answer_with: AnswerMode::default(),
            questions: Vec::new(),
            answers: HashMap::new(),
            result: None,
        }
    }

    pub fn initialize(&mut self, data: &SetData, prefs: &StudyPreferences) {
        let set = &data.data.set;
        self.terms = set.terms.iter().map(|t| (t.id.clone(), t.clone())).collect();
        self.answer_with = prefs.answer_with;
        self.core.initialize(set.term_order(), prefs.shuffle_learn);
        self.build_questions();
        self.answers.clear();
        self.result = None;
        log::info!("session: test for {} ({} questions)", set.id, self.questions.len());
    }

    /// With `AnswerMode::Both` the side alternates along the base order, so
    /// a term keeps its side however the questions are ordered
    fn build_questions(&mut self) {
        let base_index: HashMap<&str, usize> = self
            .core
            .order()
            .base()
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        self.questions = self
            .core
            .order()
            .working()
            .iter()
            .filter_map(|id| self.terms.get(id))
            .map(|term| {
                let ask_definition = match self.answer_with {
                    AnswerMode::Definition => true,
                    AnswerMode::Word => false,
                    AnswerMode::Both => base_index.get(term.id.as_str()).map_or(true, |i| i % 2 == 0),
                };
                let (prompt, expected) = if ask_definition {
                    (&term.word, &term.definition)
                } else {
                    (&term.definition, &term.word)
                };
                Question {
                    term_id: term.id.clone(),
                    prompt: prompt.clone(),
                    expected: expected.clone(),
                }
            })
            .collect();
    }

    /// Reorder the questions of an open round; answers given so far are
    /// kept. A submitted round keeps the order it was graded in and the new
    /// setting applies from the next round.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.core.order().is_shuffled() == enabled {
            return;
        }
        self.core.set_shuffle(enabled);
        if self.core.phase() != SessionPhase::Active {
            return;
        }

        let mut by_term: HashMap<String, Question> =
            self.questions.drain(..).map(|q| (q.term_id.clone(), q)).collect();
        self.questions = self
            .core
            .order()
            .working()
            .iter()
            .filter_map(|id| by_term.remove(id))
            .collect();
    }

    pub fn phase(&self) -> SessionPhase {
        self.core.phase()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answer(&self, term_id: &str) -> Option<&str> {
        self.answers.get(term_id).map(String::as_str)
    }

    pub fn record_answer(&mut self, term_id: &str, given: &str) -> Result<(), SessionError> {
        self.core.ensure_active()?;
        if !self.questions.iter().any(|q| q.term_id == term_id) {
            return Err(SessionError::UnknownTerm(term_id.to_string()));
        }
        self.answers.insert(term_id.to_string(), given.to_string());
        self.core.set_progress(self.answers.len());
        Ok(())
    }

    /// Grade the round from the locally recorded answers
    pub async fn submit(&mut self) -> Result<TestResult, SessionError> {
        self.core.begin_submit()?;
        self.core.finish();

        let entries: Vec<TestEntry> = self
            .questions
            .iter()
            .map(|q| {
                let given = self.answers.get(&q.term_id).cloned();
                let correct = given
                    .as_deref()
                    .map(|g| answers_match(g, &q.expected))
                    .unwrap_or(false);
                TestEntry {
                    term_id: q.term_id.clone(),
                    prompt: q.prompt.clone(),
                    expected: q.expected.clone(),
                    given,
                    correct,
                }
            })
            .collect();

        let result = TestResult {
            round: self.core.round(),
            score: entries.iter().filter(|e| e.correct).count(),
            total: entries.len(),
            entries,
        };
        log::info!("session: test scored {}/{}", result.score, result.total);
        self.result = Some(result.clone());
        Ok(result)
    }

    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    /// Start a fresh round over the same terms
    pub fn new_round(&mut self) -> Result<(), SessionError> {
        if self.core.phase() == SessionPhase::Initializing {
            return Err(SessionError::NotReady);
        }
        let base = self.core.order().base().to_vec();
        let shuffle = self.core.order().is_shuffled();
        self.core.restart(base, shuffle);
        self.build_questions();
        self.answers.clear();
        self.result = None;
        Ok(())
    }
}
