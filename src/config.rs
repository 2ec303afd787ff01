//! Carga y gestión de configuración de la aplicación (servidor + pipeline).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub uploads_dir: PathBuf,
    pub docs_index_path: PathBuf,
    pub chat_log_path: PathBuf,
    pub admins_path: PathBuf,
    /// Tiempo máximo de espera de la llamada al proveedor LLM.
    pub provider_timeout: Duration,
    /// Presupuesto de caracteres para el contexto documental serializado.
    pub max_context_chars: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());

        let uploads_dir =
            PathBuf::from(env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_string()));
        let docs_index_path = PathBuf::from(
            env::var("DOCS_INDEX").unwrap_or_else(|_| "data/documents.json".to_string()),
        );
        let chat_log_path = PathBuf::from(
            env::var("CHAT_LOG").unwrap_or_else(|_| "data/chat_logs.jsonl".to_string()),
        );
        let admins_path = PathBuf::from(
            env::var("ADMINS_FILE").unwrap_or_else(|_| "data/admins.json".to_string()),
        );

        let timeout_secs: u64 = env::var("PROVIDER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .context("PROVIDER_TIMEOUT_SECS debe ser un número de segundos")?;

        let max_context_chars: usize = env::var("CONTEXT_MAX_CHARS")
            .unwrap_or_else(|_| "120000".to_string())
            .parse()
            .context("CONTEXT_MAX_CHARS debe ser un número de caracteres")?;

        Ok(Self {
            server_addr,
            uploads_dir,
            docs_index_path,
            chat_log_path,
            admins_path,
            provider_timeout: Duration::from_secs(timeout_secs),
            max_context_chars,
        })
    }
}
