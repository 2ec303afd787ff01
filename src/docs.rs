//! Almacén de documentos institucionales respaldado por el sistema de
//! archivos: el fichero original se guarda en el directorio de subidas
//! (servido públicamente bajo /uploads) y el texto extraído viaja en un
//! índice JSON que el pipeline lee completo en cada consulta.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mime_guess::MimeGuess;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::models::DocumentRecord;

/// Contenido sustituto cuando la extracción de texto no produce nada.
pub const EXTRACTION_PLACEHOLDER: &str = "No text content found in PDF.";

/// Colaborador que entrega el corpus documental completo al pipeline.
#[async_trait]
pub trait DocumentContextLoader: Send + Sync {
    /// Todos los documentos vigentes, de más reciente a más antiguo.
    async fn load_all(&self) -> Result<Vec<DocumentRecord>>;
}

pub struct FsDocumentStore {
    uploads_dir: PathBuf,
    index_path: PathBuf,
    index: RwLock<Vec<DocumentRecord>>,
}

impl FsDocumentStore {
    /// Abre el almacén: carga el índice si existe y lo reconcilia con el
    /// contenido real del directorio de subidas.
    pub fn open(uploads_dir: &Path, index_path: &Path) -> Result<Self> {
        fs::create_dir_all(uploads_dir).with_context(|| {
            format!("No se pudo crear el directorio de subidas {}", uploads_dir.display())
        })?;
        if let Some(parent) = index_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut index: Vec<DocumentRecord> = if index_path.is_file() {
            let raw = fs::read_to_string(index_path)?;
            serde_json::from_str(&raw).with_context(|| {
                format!("Índice de documentos corrupto: {}", index_path.display())
            })?
        } else {
            Vec::new()
        };

        // Reconciliación: entradas sin fichero se descartan; ficheros sin
        // entrada se reportan como huérfanos.
        let before = index.len();
        index.retain(|doc| {
            let present = uploads_dir.join(&doc.storage_path).is_file();
            if !present {
                warn!("El documento '{}' ya no existe en disco; se descarta del índice.", doc.name);
            }
            present
        });

        for entry in WalkDir::new(uploads_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let file_name = entry.file_name().to_string_lossy();
            if !index.iter().any(|doc| doc.storage_path == file_name) {
                warn!("Fichero huérfano en el directorio de subidas: {file_name}");
            }
        }

        let store = Self {
            uploads_dir: uploads_dir.to_path_buf(),
            index_path: index_path.to_path_buf(),
            index: RwLock::new(index),
        };
        if before != store.index.read().unwrap().len() {
            store.persist()?;
        }
        Ok(store)
    }

    /// Guarda un fichero subido, extrae su texto y registra el documento.
    pub fn upload(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<DocumentRecord> {
        // Sólo el nombre de fichero, sin componentes de ruta.
        let safe_name = Path::new(original_name)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        let storage_path = format!("sop_{}_{}", Utc::now().timestamp_millis(), safe_name);
        let target = self.uploads_dir.join(&storage_path);
        fs::write(&target, bytes)
            .with_context(|| format!("No se pudo guardar el fichero {}", target.display()))?;

        let content = extract_text(&safe_name, bytes);
        let file_type = content_type
            .map(str::to_string)
            .or_else(|| {
                MimeGuess::from_path(&safe_name)
                    .first()
                    .map(|m| m.to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let record = DocumentRecord {
            id: Uuid::new_v4(),
            name: safe_name,
            file_type,
            url: format!("/uploads/{storage_path}"),
            content,
            storage_path,
            created_at: Utc::now(),
        };

        self.index.write().unwrap().push(record.clone());
        self.persist()?;
        info!("Documento '{}' ingerido ({} bytes).", record.name, bytes.len());
        Ok(record)
    }

    /// Todos los documentos, de más reciente a más antiguo.
    pub fn list_all(&self) -> Vec<DocumentRecord> {
        let mut all = self.index.read().unwrap().clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn get(&self, id: Uuid) -> Option<DocumentRecord> {
        self.index
            .read()
            .unwrap()
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
    }

    /// Elimina el documento y su fichero. Devuelve la entrada eliminada.
    pub fn remove(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        let removed = {
            let mut index = self.index.write().unwrap();
            match index.iter().position(|doc| doc.id == id) {
                Some(pos) => Some(index.remove(pos)),
                None => None,
            }
        };

        if let Some(doc) = &removed {
            let path = self.uploads_dir.join(&doc.storage_path);
            if let Err(e) = fs::remove_file(&path) {
                warn!("No se pudo borrar el fichero {}: {e}", path.display());
            }
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    fn persist(&self) -> Result<()> {
        let index = self.index.read().unwrap();
        let raw = serde_json::to_string_pretty(&*index)?;
        fs::write(&self.index_path, raw).with_context(|| {
            format!("No se pudo escribir el índice {}", self.index_path.display())
        })
    }
}

#[async_trait]
impl DocumentContextLoader for FsDocumentStore {
    async fn load_all(&self) -> Result<Vec<DocumentRecord>> {
        Ok(self.list_all())
    }
}

/// Extracción de texto en el momento de la subida. Nunca falla: si no se
/// puede extraer nada, el contenido queda en el texto sustituto.
fn extract_text(filename: &str, bytes: &[u8]) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();

    let text = match extension.as_str() {
        "pdf" => match pdf_extract::extract_text_from_mem(bytes) {
            Ok(content) => content,
            Err(e) => {
                warn!("No se pudo extraer texto del PDF '{filename}': {e}");
                String::new()
            }
        },
        "txt" | "md" | "log" | "html" | "css" | "js" | "csv" => {
            String::from_utf8_lossy(bytes).to_string()
        }
        other => {
            info!("Extensión '.{other}' sin extractor de texto: {filename}");
            String::new()
        }
    };

    if text.trim().is_empty() {
        EXTRACTION_PLACEHOLDER.to_string()
    } else {
        text
    }
}
