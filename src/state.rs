//! In-memory application state shared by the HTTP server and the run driver.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::ChatGateway;
use crate::screening::aggregate::rank_results;
use crate::screening::evaluate::{validate_rubric, EvaluationConfig};
use crate::screening::types::{
    EvaluationProgress, EvaluationResult, Profile, ProgressUpdate, Rubric, RubricItem,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid rubric: {0}")]
    InvalidRubric(String),
    #[error("rubric not found: {0}")]
    RubricNotFound(String),
    #[error("an evaluation run is already in progress")]
    AlreadyEvaluating,
}

/// Rubric as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<RubricItem>,
}

impl RubricDraft {
    /// Trim, drop items without a description and fill in missing item ids.
    fn into_rubric(self, id: String, created_at: chrono::DateTime<Utc>) -> Result<Rubric, StateError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(StateError::InvalidRubric("title is required".into()));
        }

        let items: Vec<RubricItem> = self
            .items
            .into_iter()
            .filter(|item| !item.description.trim().is_empty())
            .enumerate()
            .map(|(i, mut item)| {
                if item.id.trim().is_empty() {
                    item.id = format!("item{}", i + 1);
                }
                item
            })
            .collect();
        if items.is_empty() {
            return Err(StateError::InvalidRubric(
                "at least one item with a description is required".into(),
            ));
        }

        let rubric = Rubric {
            id,
            title,
            items,
            created_at,
        };
        validate_rubric(&rubric).map_err(|e| StateError::InvalidRubric(e.to_string()))?;
        Ok(rubric)
    }
}

/// Handle for a started run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub cancel: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Snapshot of the session for clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_evaluating: bool,
    pub run_id: Option<Uuid>,
    pub progress: Option<EvaluationProgress>,
}

#[derive(Default)]
struct Session {
    rubrics: Vec<Rubric>,
    evaluations: HashMap<String, Vec<EvaluationResult>>,
    is_evaluating: bool,
    progress: Option<EvaluationProgress>,
    run: Option<RunHandle>,
}

fn merge_progress(session: &mut Session, update: ProgressUpdate) {
    let progress = session.progress.get_or_insert_with(EvaluationProgress::default);
    if let Some(v) = update.current_rubric {
        progress.current_rubric = v;
    }
    if let Some(v) = update.current_rubric_index {
        progress.current_rubric_index = v;
    }
    if let Some(v) = update.total_rubrics {
        progress.total_rubrics = v;
    }
    if let Some(v) = update.current_profile {
        progress.current_profile = v;
    }
    if let Some(v) = update.total_profiles {
        progress.total_profiles = v;
    }
    if let Some(v) = update.completed_rubrics {
        progress.completed_rubrics = v;
    }
}

/// Shared state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn ChatGateway>,
    pub config: Arc<EvaluationConfig>,
    profiles: Arc<[Profile]>,
    session: Arc<RwLock<Session>>,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        config: EvaluationConfig,
        profiles: Vec<Profile>,
    ) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
            profiles: profiles.into(),
            session: Arc::new(RwLock::new(Session::default())),
        }
    }

    // The lock is never held across an await; recover from poisoning.
    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn profiles(&self) -> Arc<[Profile]> {
        Arc::clone(&self.profiles)
    }

    pub fn rubrics(&self) -> Vec<Rubric> {
        self.read().rubrics.clone()
    }

    pub fn rubric(&self, id: &str) -> Option<Rubric> {
        self.read().rubrics.iter().find(|r| r.id == id).cloned()
    }

    pub fn add_rubric(&self, draft: RubricDraft) -> Result<Rubric, StateError> {
        let id = draft
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut session = self.write();
        if session.rubrics.iter().any(|r| r.id == id) {
            return Err(StateError::InvalidRubric(format!("rubric id already exists: {id}")));
        }
        let rubric = draft.into_rubric(id, Utc::now())?;
        session.rubrics.push(rubric.clone());
        tracing::info!(rubric = %rubric.id, items = rubric.items.len(), "rubric added");
        Ok(rubric)
    }

    /// Replace a rubric's title and items. Its id and creation time are kept.
    pub fn update_rubric(&self, id: &str, draft: RubricDraft) -> Result<Rubric, StateError> {
        let mut session = self.write();
        let existing = session
            .rubrics
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StateError::RubricNotFound(id.to_string()))?;
        let updated = draft.into_rubric(existing.id.clone(), existing.created_at)?;
        *existing = updated.clone();
        Ok(updated)
    }

    /// Remove a rubric along with its results.
    pub fn delete_rubric(&self, id: &str) -> Result<(), StateError> {
        let mut session = self.write();
        let before = session.rubrics.len();
        session.rubrics.retain(|r| r.id != id);
        if session.rubrics.len() == before {
            return Err(StateError::RubricNotFound(id.to_string()));
        }
        session.evaluations.remove(id);
        Ok(())
    }

    pub fn start_evaluation(&self) -> Result<RunHandle, StateError> {
        let mut session = self.write();
        if session.is_evaluating {
            return Err(StateError::AlreadyEvaluating);
        }
        let handle = RunHandle {
            run_id: Uuid::new_v4(),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        session.is_evaluating = true;
        session.progress = None;
        session.run = Some(handle.clone());
        Ok(handle)
    }

    /// Flag the current run (if any) to stop and clear progress.
    pub fn stop_evaluation(&self) {
        let mut session = self.write();
        if let Some(run) = session.run.take() {
            run.cancel.store(true, Ordering::SeqCst);
        }
        session.is_evaluating = false;
        session.progress = None;
    }

    /// End `run` if it is still the current one. A newer run is left alone.
    pub fn finish_evaluation(&self, run: &RunHandle) {
        let mut session = self.write();
        if session.run.as_ref().map(|r| r.run_id) == Some(run.run_id) {
            session.run = None;
            session.is_evaluating = false;
            session.progress = None;
        }
    }

    pub fn is_evaluating(&self) -> bool {
        self.read().is_evaluating
    }

    pub fn progress(&self) -> Option<EvaluationProgress> {
        self.read().progress.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let session = self.read();
        SessionStatus {
            is_evaluating: session.is_evaluating,
            run_id: session.run.as_ref().map(|r| r.run_id),
            progress: session.progress.clone(),
        }
    }

    /// Merge set fields into the current progress, starting from empty.
    pub fn update_progress(&self, update: ProgressUpdate) {
        merge_progress(&mut self.write(), update);
    }

    /// Like `update_progress`, but only while `run` is the current run. A
    /// stopped or superseded run leaves progress alone.
    pub fn update_progress_for(&self, run: &RunHandle, update: ProgressUpdate) -> bool {
        let mut session = self.write();
        if session.run.as_ref().map(|r| r.run_id) != Some(run.run_id) {
            return false;
        }
        merge_progress(&mut session, update);
        true
    }

    /// Store results for a rubric that still exists.
    pub fn set_evaluation_results(
        &self,
        rubric_id: &str,
        results: Vec<EvaluationResult>,
    ) -> Result<(), StateError> {
        let mut session = self.write();
        if !session.rubrics.iter().any(|r| r.id == rubric_id) {
            return Err(StateError::RubricNotFound(rubric_id.to_string()));
        }
        session.evaluations.insert(rubric_id.to_string(), results);
        Ok(())
    }

    pub fn clear_evaluations(&self) {
        self.write().evaluations.clear();
    }

    /// Ranked results per rubric, in rubric order. Results for profiles that
    /// are not loaded are dropped.
    pub fn ranked_results(&self) -> Vec<(Rubric, Vec<EvaluationResult>)> {
        let known: HashSet<&str> = self.profiles.iter().map(|p| p.id.as_str()).collect();
        let session = self.read();
        session
            .rubrics
            .iter()
            .filter_map(|rubric| {
                let results = session.evaluations.get(&rubric.id)?;
                let mut ranked: Vec<EvaluationResult> = results
                    .iter()
                    .filter(|r| known.contains(r.profile_id.as_str()))
                    .cloned()
                    .collect();
                rank_results(&mut ranked);
                Some((rubric.clone(), ranked))
            })
            .collect()
    }
}
