//! Durable job record store backed by SQLite.
//!
//! Sole source of truth for job progress. One orchestrator task writes a
//! given record; any number of pollers read it. Operations are synchronous
//! and sub-millisecond, so the connection sits behind a plain mutex.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::warn;
use uuid::Uuid;

use crate::domain::evaluation::{Evaluation, Recommendation};
use crate::domain::job::{EmailStatus, JobRecord, Stage};
use crate::error::PipelineError;

/// SQLite-backed job record store
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    /// Open (and migrate) the store at the given path
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<(), PipelineError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id                   TEXT PRIMARY KEY,
                owner                TEXT NOT NULL,
                source_key           TEXT NOT NULL,
                original_name        TEXT NOT NULL,
                status               TEXT NOT NULL,
                status_detail        TEXT,
                evaluation           TEXT,
                overall_score        INTEGER,
                recommendation       TEXT,
                confidence_score     INTEGER,
                report_key           TEXT,
                email_status         TEXT,
                email_failure_reason TEXT,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_owner_created
                ON jobs(owner, created_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Create a new job record with status PENDING
    pub fn create(
        &self,
        owner: &str,
        source_key: &str,
        original_name: &str,
    ) -> Result<Uuid, PipelineError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO jobs (id, owner, source_key, original_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                owner,
                source_key,
                original_name,
                Stage::Pending.as_str(),
                now
            ],
        )?;

        Ok(id)
    }

    /// Fetch a full job record
    pub fn get(&self, job_id: Uuid) -> Result<JobRecord, PipelineError> {
        let conn = self.conn();
        let record = conn.query_row(
            "SELECT id, owner, source_key, original_name, status, status_detail,
                    evaluation, overall_score, recommendation, confidence_score,
                    report_key, email_status, email_failure_reason, created_at, updated_at
             FROM jobs WHERE id = ?1",
            [job_id.to_string()],
            row_to_record,
        )?;
        Ok(record)
    }

    /// Current stage only; the polling read path
    pub fn get_status(&self, job_id: Uuid) -> Result<Stage, PipelineError> {
        let conn = self.conn();
        let status: String = conn.query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            [job_id.to_string()],
            |row| row.get(0),
        )?;

        Stage::parse(&status)
            .ok_or_else(|| PipelineError::Persistence(format!("corrupt status '{}'", status)))
    }

    /// Persist a stage transition, enforcing the forward-only order.
    ///
    /// FAILED is accepted from any non-terminal stage; a terminal record
    /// rejects all further transitions. FILE_UNAVAILABLE only moves through
    /// [`Self::mark_file_unavailable`].
    pub fn update_stage(
        &self,
        job_id: Uuid,
        stage: Stage,
        detail: Option<&str>,
    ) -> Result<(), PipelineError> {
        let conn = self.conn();

        let current: String = conn.query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            [job_id.to_string()],
            |row| row.get(0),
        )?;
        let current = Stage::parse(&current)
            .ok_or_else(|| PipelineError::Persistence(format!("corrupt status '{}'", current)))?;

        if current.is_terminal() {
            return Err(PipelineError::Persistence(format!(
                "job {} already terminal at {}",
                job_id, current
            )));
        }

        let allowed = match stage {
            Stage::Failed => true,
            Stage::FileUnavailable => false,
            next => matches!(
                (next.ordinal(), current.ordinal()),
                (Some(n), Some(c)) if n > c
            ),
        };
        if !allowed {
            return Err(PipelineError::Persistence(format!(
                "illegal transition {} -> {} for job {}",
                current, stage, job_id
            )));
        }

        conn.execute(
            "UPDATE jobs SET status = ?1, status_detail = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                stage.as_str(),
                detail,
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;

        Ok(())
    }

    /// Attach the evaluation document and its derived fields in one update
    pub fn save_evaluation(
        &self,
        job_id: Uuid,
        evaluation: &Evaluation,
        overall_score: u8,
        recommendation: Recommendation,
        confidence_score: u8,
    ) -> Result<(), PipelineError> {
        let json = serde_json::to_string(evaluation)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        let updated = self.conn().execute(
            "UPDATE jobs SET evaluation = ?1, overall_score = ?2, recommendation = ?3,
                    confidence_score = ?4, updated_at = ?5 WHERE id = ?6",
            params![
                json,
                overall_score,
                recommendation.as_str(),
                confidence_score,
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;

        if updated == 0 {
            return Err(PipelineError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    /// Record the report key and transition to COMPLETED in one update, so
    /// no "uploaded but not marked complete" state is externally observable.
    pub fn set_report_key(&self, job_id: Uuid, report_key: &str) -> Result<(), PipelineError> {
        let updated = self.conn().execute(
            "UPDATE jobs SET report_key = ?1, status = ?2, status_detail = NULL, updated_at = ?3
             WHERE id = ?4 AND status NOT IN (?5, ?6, ?7)",
            params![
                report_key,
                Stage::Completed.as_str(),
                Utc::now().to_rfc3339(),
                job_id.to_string(),
                Stage::Completed.as_str(),
                Stage::Failed.as_str(),
                Stage::FileUnavailable.as_str()
            ],
        )?;

        if updated == 0 {
            return Err(PipelineError::Persistence(format!(
                "job {} not found or already terminal",
                job_id
            )));
        }
        Ok(())
    }

    /// Record the notification outcome; never affects the pipeline status
    pub fn set_email_status(
        &self,
        job_id: Uuid,
        status: EmailStatus,
        reason: Option<&str>,
    ) -> Result<(), PipelineError> {
        self.conn().execute(
            "UPDATE jobs SET email_status = ?1, email_failure_reason = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                status.as_str(),
                reason,
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;
        Ok(())
    }

    /// Sideways correction applied when the report artifact turns out to be
    /// missing from storage at access time.
    pub fn mark_file_unavailable(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let updated = self.conn().execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                Stage::FileUnavailable.as_str(),
                Utc::now().to_rfc3339(),
                job_id.to_string()
            ],
        )?;

        if updated == 0 {
            return Err(PipelineError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    /// All records for an owner, newest first
    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<JobRecord>, PipelineError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, owner, source_key, original_name, status, status_detail,
                    evaluation, overall_score, recommendation, confidence_score,
                    report_key, email_status, email_failure_reason, created_at, updated_at
             FROM jobs WHERE owner = ?1 ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([owner], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Delete a record, checking ownership
    pub fn delete(&self, job_id: Uuid, owner: &str) -> Result<(), PipelineError> {
        let deleted = self.conn().execute(
            "DELETE FROM jobs WHERE id = ?1 AND owner = ?2",
            params![job_id.to_string(), owner],
        )?;

        if deleted == 0 {
            return Err(PipelineError::NotFound(format!(
                "job {} for owner {}",
                job_id, owner
            )));
        }
        Ok(())
    }

    /// Bulk-delete an owner's records in a given status; returns the count
    pub fn delete_where_status(&self, owner: &str, status: Stage) -> Result<usize, PipelineError> {
        let deleted = self.conn().execute(
            "DELETE FROM jobs WHERE owner = ?1 AND status = ?2",
            params![owner, status.as_str()],
        )?;
        Ok(deleted)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let evaluation_json: Option<String> = row.get(6)?;
    let recommendation_str: Option<String> = row.get(8)?;
    let email_status_str: Option<String> = row.get(11)?;
    let created_at_str: String = row.get(13)?;
    let updated_at_str: String = row.get(14)?;

    Ok(JobRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        owner: row.get(1)?,
        source_key: row.get(2)?,
        original_name: row.get(3)?,
        status: Stage::parse(&status_str).unwrap_or(Stage::Failed),
        status_detail: row.get(5)?,
        evaluation: evaluation_json.and_then(|json| serde_json::from_str(&json).ok()),
        overall_score: row.get(7)?,
        recommendation: recommendation_str.as_deref().and_then(Recommendation::parse),
        confidence_score: row.get(9)?,
        report_key: row.get(10)?,
        email_status: email_status_str.as_deref().and_then(EmailStatus::parse),
        email_failure_reason: row.get(12)?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Failed to parse stored timestamp '{}': {}", s, e);
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evaluation::{CategoryEvaluation, CATEGORY_WEIGHTS};
    use std::collections::BTreeMap;

    fn store() -> JobStore {
        JobStore::open_in_memory().unwrap()
    }

    fn sample_evaluation() -> Evaluation {
        let mut categories = BTreeMap::new();
        for (name, _) in CATEGORY_WEIGHTS {
            categories.insert(
                name.to_string(),
                CategoryEvaluation {
                    score: 8,
                    feedback: "good".to_string(),
                },
            );
        }
        Evaluation {
            categories,
            overall_strengths: vec!["focus".to_string()],
            overall_weaknesses: vec!["burn".to_string()],
            recommendation: Recommendation::StrongBuy,
            confidence_score: 90,
            recommendations: "proceed to diligence".to_string(),
            processing_date: None,
        }
    }

    #[test]
    fn test_create_starts_pending() {
        let store = store();
        let id = store.create("alice", "decks/abc-deck.pptx", "deck.pptx").unwrap();

        assert_eq!(store.get_status(id).unwrap(), Stage::Pending);

        let record = store.get(id).unwrap();
        assert_eq!(record.owner, "alice");
        assert_eq!(record.source_key, "decks/abc-deck.pptx");
        assert!(record.evaluation.is_none());
        assert!(record.report_key.is_none());
    }

    #[test]
    fn test_forward_transitions() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();

        store.update_stage(id, Stage::UploadingDeck, None).unwrap();
        store.update_stage(id, Stage::ExtractingText, None).unwrap();
        assert_eq!(store.get_status(id).unwrap(), Stage::ExtractingText);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();

        store.update_stage(id, Stage::AnalyzingAi, None).unwrap();
        let err = store.update_stage(id, Stage::UploadingDeck, None).unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
    }

    #[test]
    fn test_failed_reachable_from_any_stage() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();

        store.update_stage(id, Stage::GeneratingPdf, None).unwrap();
        store
            .update_stage(id, Stage::Failed, Some("GENERATING_PDF: renderer crashed"))
            .unwrap();

        let record = store.get(id).unwrap();
        assert_eq!(record.status, Stage::Failed);
        assert_eq!(
            record.status_detail.as_deref(),
            Some("GENERATING_PDF: renderer crashed")
        );
    }

    #[test]
    fn test_terminal_rejects_further_transitions() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();

        store.update_stage(id, Stage::Failed, Some("boom")).unwrap();
        assert!(store.update_stage(id, Stage::UploadingDeck, None).is_err());
        assert!(store.update_stage(id, Stage::Failed, None).is_err());
    }

    #[test]
    fn test_save_evaluation_sets_derived_fields() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();
        let evaluation = sample_evaluation();

        store
            .save_evaluation(id, &evaluation, 80, Recommendation::StrongBuy, 90)
            .unwrap();

        let record = store.get(id).unwrap();
        assert_eq!(record.overall_score, Some(80));
        assert_eq!(record.recommendation, Some(Recommendation::StrongBuy));
        assert_eq!(record.confidence_score, Some(90));
        assert_eq!(record.evaluation.unwrap(), evaluation);
    }

    #[test]
    fn test_set_report_key_completes_atomically() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();
        store.update_stage(id, Stage::UploadingPdf, None).unwrap();

        store.set_report_key(id, "reports/thesis.pdf").unwrap();

        let record = store.get(id).unwrap();
        assert_eq!(record.status, Stage::Completed);
        assert_eq!(record.report_key.as_deref(), Some("reports/thesis.pdf"));
    }

    #[test]
    fn test_set_report_key_rejected_after_failure() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();
        store.update_stage(id, Stage::Failed, Some("boom")).unwrap();

        assert!(store.set_report_key(id, "reports/x.pdf").is_err());
    }

    #[test]
    fn test_email_status_mutable_after_completion() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();
        store.update_stage(id, Stage::UploadingPdf, None).unwrap();
        store.set_report_key(id, "reports/x.pdf").unwrap();

        store
            .set_email_status(id, EmailStatus::Failed, Some("recipient missing"))
            .unwrap();

        let record = store.get(id).unwrap();
        assert_eq!(record.status, Stage::Completed);
        assert_eq!(record.email_status, Some(EmailStatus::Failed));
        assert_eq!(
            record.email_failure_reason.as_deref(),
            Some("recipient missing")
        );
    }

    #[test]
    fn test_mark_file_unavailable_from_completed() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();
        store.update_stage(id, Stage::UploadingPdf, None).unwrap();
        store.set_report_key(id, "reports/x.pdf").unwrap();

        store.mark_file_unavailable(id).unwrap();
        assert_eq!(store.get_status(id).unwrap(), Stage::FileUnavailable);
    }

    #[test]
    fn test_list_for_owner_newest_first() {
        let store = store();
        let first = store.create("alice", "k1", "a.pptx").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create("alice", "k2", "b.pptx").unwrap();
        store.create("bob", "k3", "c.pptx").unwrap();

        let records = store.list_for_owner("alice").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second);
        assert_eq!(records[1].id, first);
    }

    #[test]
    fn test_delete_checks_ownership() {
        let store = store();
        let id = store.create("alice", "k", "deck.pptx").unwrap();

        let err = store.delete(id, "mallory").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(store.get(id).is_ok());

        store.delete(id, "alice").unwrap();
        assert!(matches!(store.get(id), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_delete_where_status() {
        let store = store();
        let a = store.create("alice", "k1", "a.pptx").unwrap();
        let b = store.create("alice", "k2", "b.pptx").unwrap();
        store.create("alice", "k3", "c.pptx").unwrap();

        for id in [a, b] {
            store.update_stage(id, Stage::UploadingPdf, None).unwrap();
            store.set_report_key(id, "reports/x.pdf").unwrap();
            store.mark_file_unavailable(id).unwrap();
        }

        let removed = store
            .delete_where_status("alice", Stage::FileUnavailable)
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list_for_owner("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_get_status_missing_job() {
        let store = store();
        let err = store.get_status(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
