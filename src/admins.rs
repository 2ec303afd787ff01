//! Nómina de administradores (fichero JSON). La autenticación queda fuera
//! de este backend; aquí sólo vive el CRUD del listado.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Cambios parciales sobre un administrador.
#[derive(Debug, Default, Deserialize)]
pub struct AdminChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

pub struct AdminRoster {
    path: PathBuf,
    admins: RwLock<Vec<AdminRecord>>,
}

impl AdminRoster {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let admins: Vec<AdminRecord> = if path.is_file() {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Nómina de administradores corrupta: {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            admins: RwLock::new(admins),
        })
    }

    pub fn list(&self) -> Vec<AdminRecord> {
        self.admins.read().unwrap().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<AdminRecord> {
        self.admins
            .read()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Alta de un administrador. El correo debe ser válido y único.
    pub fn register(&self, name: &str, email: &str, role: &str) -> Result<AdminRecord> {
        if !is_valid_email(email) {
            return Err(anyhow!("Correo electrónico no válido: {email}"));
        }
        let record = {
            let mut admins = self.admins.write().unwrap();
            if admins.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
                return Err(anyhow!("Ya existe un administrador con el correo {email}"));
            }
            let record = AdminRecord {
                id: Uuid::new_v4(),
                name: name.to_string(),
                email: email.to_string(),
                role: role.to_string(),
                created_at: Utc::now(),
            };
            admins.push(record.clone());
            record
        };
        self.persist()?;
        Ok(record)
    }

    pub fn update(&self, id: Uuid, changes: AdminChanges) -> Result<Option<AdminRecord>> {
        let updated = {
            let mut admins = self.admins.write().unwrap();
            let Some(admin) = admins.iter_mut().find(|a| a.id == id) else {
                return Ok(None);
            };
            if let Some(email) = &changes.email {
                if !is_valid_email(email) {
                    return Err(anyhow!("Correo electrónico no válido: {email}"));
                }
                admin.email = email.clone();
            }
            if let Some(name) = changes.name {
                admin.name = name;
            }
            if let Some(role) = changes.role {
                admin.role = role;
            }
            admin.clone()
        };
        self.persist()?;
        Ok(Some(updated))
    }

    pub fn remove(&self, id: Uuid) -> Result<Option<AdminRecord>> {
        let removed = {
            let mut admins = self.admins.write().unwrap();
            match admins.iter().position(|a| a.id == id) {
                Some(pos) => Some(admins.remove(pos)),
                None => None,
            }
        };
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        let admins = self.admins.read().unwrap();
        let raw = serde_json::to_string_pretty(&*admins)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("No se pudo escribir {}", self.path.display()))
    }
}

/// Validación mínima de formato: una sola arroba, dominio con punto y sin
/// espacios en blanco.
pub fn is_valid_email(email: &str) -> bool {
    if email.contains(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}
