//! Form persistence: the current draft and the list of submitted forms.
//!
//! [`SledStore`] keeps two trees: `drafts` (a single `current` entry) and `submissions`,
//! keyed by big-endian submission time followed by the submission id so that a reverse
//! scan yields newest-first.

use crate::error::{CoreError, CoreResult};
use crate::form::FormData;
use crate::transcript::now_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const DRAFTS_TREE: &str = "drafts";
const SUBMISSIONS_TREE: &str = "submissions";
const CURRENT_DRAFT_KEY: &[u8] = b"current";

/// A completed form as stored after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub form: FormData,
    pub summary: String,
    /// Unix epoch milliseconds.
    pub submitted_at: i64,
}

#[async_trait]
pub trait FormStore: Send + Sync {
    /// The saved draft, if one exists.
    async fn get_draft(&self) -> CoreResult<Option<FormData>>;

    /// Replace the saved draft. An empty form removes it.
    async fn save_draft(&self, form: &FormData) -> CoreResult<()>;

    /// Store a completed form. Fails with [`CoreError::IncompleteForm`] otherwise.
    async fn submit_form(&self, form: &FormData, summary: &str) -> CoreResult<Submission>;

    /// All submissions, newest first.
    async fn get_all_submissions(&self) -> CoreResult<Vec<Submission>>;

    /// Remove every draft and submission.
    async fn clear_database(&self) -> CoreResult<()>;
}

pub struct SledStore {
    db: Db,
    drafts: Tree,
    submissions: Tree,
}

impl SledStore {
    /// Opens or creates the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        let drafts = db.open_tree(DRAFTS_TREE)?;
        let submissions = db.open_tree(SUBMISSIONS_TREE)?;
        info!("💾 Form store opened at {}", path.as_ref().display());
        Ok(Self {
            db,
            drafts,
            submissions,
        })
    }

    /// Temporary in-memory store (nothing is written to disk).
    pub fn temporary() -> CoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let drafts = db.open_tree(DRAFTS_TREE)?;
        let submissions = db.open_tree(SUBMISSIONS_TREE)?;
        Ok(Self {
            db,
            drafts,
            submissions,
        })
    }

    fn submission_key(submitted_at: i64, id: &Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&submitted_at.to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }
}

#[async_trait]
impl FormStore for SledStore {
    async fn get_draft(&self) -> CoreResult<Option<FormData>> {
        match self.drafts.get(CURRENT_DRAFT_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_draft(&self, form: &FormData) -> CoreResult<()> {
        if form.is_empty() {
            self.drafts.remove(CURRENT_DRAFT_KEY)?;
        } else {
            let bytes = serde_json::to_vec(form)?;
            self.drafts.insert(CURRENT_DRAFT_KEY, bytes)?;
        }
        self.drafts.flush_async().await?;
        debug!(target: "vaani::store", "draft saved");
        Ok(())
    }

    async fn submit_form(&self, form: &FormData, summary: &str) -> CoreResult<Submission> {
        if !form.is_complete() {
            return Err(CoreError::IncompleteForm);
        }
        let submission = Submission {
            id: Uuid::new_v4(),
            form: form.clone(),
            summary: summary.to_string(),
            submitted_at: now_ms(),
        };
        let key = Self::submission_key(submission.submitted_at, &submission.id);
        self.submissions
            .insert(key, serde_json::to_vec(&submission)?)?;
        self.submissions.flush_async().await?;
        info!("📨 Form submitted ({})", submission.id);
        Ok(submission)
    }

    async fn get_all_submissions(&self) -> CoreResult<Vec<Submission>> {
        let mut out = Vec::new();
        for entry in self.submissions.iter().rev() {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    async fn clear_database(&self) -> CoreResult<()> {
        self.drafts.clear()?;
        self.submissions.clear()?;
        self.db.flush_async().await?;
        info!("🧹 Form store cleared");
        Ok(())
    }
}
