//! Persistent record of answered and unresolved questions.
//!
//! Two SQLite tables: `question_agent_ia` holds one row per logged answer and
//! `unknown_question` one row per question escalated to HR. Both are created
//! idempotently when the log is opened.

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreError;
use crate::rag::store::open_connection;

/// Document name recorded when no policy applied.
pub const UNSPECIFIED_POLICY: &str = "No especificada";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS question_agent_ia (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    question       TEXT NOT NULL,
    file_consulted TEXT,
    contexts       INTEGER DEFAULT 0,
    answer_ia      TEXT,
    fecha_registro TEXT DEFAULT CURRENT_TIMESTAMP,
    notes          TEXT
);
CREATE INDEX IF NOT EXISTS idx_question_agent_ia_fecha ON question_agent_ia (fecha_registro);
CREATE TABLE IF NOT EXISTS unknown_question (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    pregunta       TEXT NOT NULL,
    respuesta      TEXT,
    rut            TEXT,
    nombre_usuario TEXT,
    fecha_registro TEXT DEFAULT CURRENT_TIMESTAMP,
    notas          TEXT
);
CREATE INDEX IF NOT EXISTS idx_unknown_question_fecha ON unknown_question (fecha_registro);
";

/// A row of `question_agent_ia`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    pub file_consulted: String,
    pub contexts: bool,
    pub answer: String,
    pub notes: String,
}

/// A row of `unknown_question`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedRecord {
    pub pregunta: String,
    pub respuesta: String,
    pub rut: String,
    pub nombre_usuario: String,
    pub notas: String,
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Insert a question-log row and return its id.
    async fn record_question(&self, record: QuestionRecord) -> Result<i64, StoreError>;

    /// Insert an unresolved-question row and return its id.
    async fn record_unresolved(&self, record: UnresolvedRecord) -> Result<i64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteInteractionLog {
    path: PathBuf,
}

impl SqliteInteractionLog {
    /// Open the log file, creating the tables if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Open {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
        }
        let log = Self { path };
        log.with_connection(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        debug!(path = %log.path.display(), "Interaction log ready");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Row counts of (`question_agent_ia`, `unknown_question`).
    pub async fn counts(&self) -> Result<(usize, usize), StoreError> {
        self.with_connection(|conn| {
            let questions: i64 =
                conn.query_row("SELECT COUNT(*) FROM question_agent_ia", [], |r| r.get(0))?;
            let unresolved: i64 =
                conn.query_row("SELECT COUNT(*) FROM unknown_question", [], |r| r.get(0))?;
            Ok((questions as usize, unresolved as usize))
        })
        .await
    }

    /// Every question-log row, oldest first.
    pub async fn questions(&self) -> Result<Vec<QuestionRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT question, file_consulted, contexts, answer_ia, notes
                 FROM question_agent_ia ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(QuestionRecord {
                        question: row.get(0)?,
                        file_consulted: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        contexts: row.get::<_, i64>(2)? != 0,
                        answer: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        notes: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Every unresolved-question row, oldest first.
    pub async fn unresolved(&self) -> Result<Vec<UnresolvedRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pregunta, respuesta, rut, nombre_usuario, notas
                 FROM unknown_question ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UnresolvedRecord {
                        pregunta: row.get(0)?,
                        respuesta: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        rut: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        nombre_usuario: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        notas: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task {
            message: e.to_string(),
        })?
    }
}

#[async_trait]
impl InteractionLog for SqliteInteractionLog {
    async fn record_question(&self, record: QuestionRecord) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO question_agent_ia (question, file_consulted, contexts, answer_ia, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.question,
                    record.file_consulted,
                    record.contexts,
                    record.answer,
                    record.notes,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn record_unresolved(&self, record: UnresolvedRecord) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO unknown_question (pregunta, respuesta, rut, nombre_usuario, notas)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.pregunta,
                    record.respuesta,
                    record.rut,
                    record.nombre_usuario,
                    record.notas,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }
}
