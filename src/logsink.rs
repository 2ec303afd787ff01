//! Persistencia de los registros de chat (fichero JSONL, una línea por
//! conversación completada) y su consulta desde el panel de analítica.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::models::ChatLogRecord;

/// Colaborador al que el pipeline emite un registro por consulta completada.
/// El fallo de un append nunca debe alcanzar la respuesta al usuario.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, record: &ChatLogRecord) -> Result<()>;
}

/// Filtros de la pantalla de revisión de conversaciones.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogFilter {
    /// Subcadena sobre pregunta o respuesta, sin distinguir mayúsculas.
    pub search: Option<String>,
    pub lang: Option<String>,
    #[serde(rename = "type")]
    pub question_type: Option<String>,
    pub framework: Option<String>,
    pub code: Option<bool>,
}

pub struct JsonlChatLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlChatLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Registros que pasan el filtro, de más reciente a más antiguo.
    /// Las líneas corruptas se saltan con un aviso.
    pub fn list(&self, filter: &LogFilter) -> Result<Vec<ChatLogRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<ChatLogRecord> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Línea corrupta en el log de chat, se ignora: {e}");
                    None
                }
            })
            .filter(|record| matches(record, filter))
            .collect();

        records.reverse();
        Ok(records)
    }
}

#[async_trait]
impl LogSink for JsonlChatLog {
    async fn append(&self, record: &ChatLogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("No se pudo abrir el log {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn matches(record: &ChatLogRecord, filter: &LogFilter) -> bool {
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        let hit = record.question.to_lowercase().contains(&needle)
            || record.answer.to_lowercase().contains(&needle);
        if !hit {
            return false;
        }
    }
    if let Some(lang) = &filter.lang {
        if record.language_env.as_deref() != Some(lang.as_str()) {
            return false;
        }
    }
    if let Some(question_type) = &filter.question_type {
        if record.question_type.as_deref() != Some(question_type.as_str()) {
            return false;
        }
    }
    if let Some(framework) = &filter.framework {
        if record.framework.as_deref() != Some(framework.as_str()) {
            return false;
        }
    }
    if let Some(code) = filter.code {
        if record.has_code != Some(code) {
            return false;
        }
    }
    true
}
