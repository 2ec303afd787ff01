//! Catálogo de modelos configurados.
//!
//! Se siembra con los cuatro modelos por defecto y es editable en caliente
//! por el panel de administración. Para el pipeline es una búsqueda pura
//! por id; un id desconocido es un error del cliente, no del servidor.

use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::models::{ModelCategory, ModelDefinition};

pub struct ModelCatalog {
    models: RwLock<HashMap<String, ModelDefinition>>,
}

impl ModelCatalog {
    /// Catálogo vacío.
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Catálogo sembrado con los modelos por defecto. Las claves de API se
    /// leen de su variable de entorno; si falta alguna, el modelo queda
    /// configurado igualmente y la invocación fallará en su momento.
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        let defaults = [
            (
                "trinity",
                "arcee-ai/trinity-mini:free",
                "TRINITY_API_KEY",
                ModelCategory::NavigationSupport,
                "You are the CodeTribe Career Coach. Your role is to navigate the documents provided and tell the submission dates, schedules, reminders and provide source of where students can submit or find more information. Always cite your sources from the provided documents.",
                "Best for Navigation & Support. Great for motivational and career guidance.",
            ),
            (
                "stepfun",
                "stepfun/step-3.5-flash:free",
                "STEPFUN_API_KEY",
                ModelCategory::PolicyCompliance,
                "You are the CodeTribe Compliance Bot. Your primary goal is providing accurate, QCTO-aligned information, requirements, guidelines and policies for Mlab students. Always cite your sources from the provided documents.",
                "Best for Policy & Compliance. High accuracy for document-heavy queries.",
            ),
            (
                "nemotron",
                "nvidia/nemotron-3-nano-30b-a3b:free",
                "NEMOTRON_API_KEY",
                ModelCategory::TechnicalLogical,
                "You are the CodeTribe Technical Tutor. You specialize in React, TypeScript, and Angular logic. Do not generate code, but provide step-by-step guidance to solve technical problems. Explain coding concepts in simple terms and help users debug their code by pointing out logical errors and suggestions. Provide external links for documentation where users can find that information.",
                "Best for Technical & Logical. Exceptional speed and reasoning for coding tasks.",
            ),
            (
                "GLM",
                "z-ai/glm-4.5-air:free",
                "GLM_API_KEY",
                ModelCategory::NavigationSupport,
                "You are the CodeTribe Navigation Assistant. Help users find their way around the LMS, check deadlines, and understand site features.",
                "Best for Navigation & Support. Strong agentic capabilities for 'how-to' guidance.",
            ),
        ];

        {
            let mut models = catalog.models.write().unwrap();
            for (id, full_name, key_env, category, system_prompt, description) in defaults {
                let now = Utc::now();
                models.insert(
                    id.to_string(),
                    ModelDefinition {
                        id: id.to_string(),
                        name: id.to_string(),
                        full_name: full_name.to_string(),
                        api_key: env::var(key_env).ok(),
                        category,
                        system_prompt: system_prompt.to_string(),
                        description: description.to_string(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        catalog
    }

    /// Búsqueda por id. Devuelve una copia de la definición.
    pub fn get(&self, id: &str) -> Option<ModelDefinition> {
        self.models.read().unwrap().get(id).cloned()
    }

    /// Todos los modelos, ordenados por id.
    pub fn list(&self) -> Vec<ModelDefinition> {
        let mut all: Vec<_> = self.models.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Alta de un modelo nuevo. El id debe ser único.
    pub fn insert(&self, model: ModelDefinition) -> Result<ModelDefinition> {
        let mut models = self.models.write().unwrap();
        if models.contains_key(&model.id) {
            return Err(anyhow!("Ya existe un modelo con id '{}'", model.id));
        }
        models.insert(model.id.clone(), model.clone());
        Ok(model)
    }

    /// Actualización parcial de un modelo existente.
    pub fn update(&self, id: &str, changes: ModelChanges) -> Option<ModelDefinition> {
        let mut models = self.models.write().unwrap();
        let model = models.get_mut(id)?;
        if let Some(name) = changes.name {
            model.name = name;
        }
        if let Some(full_name) = changes.full_name {
            model.full_name = full_name;
        }
        if let Some(category) = changes.category {
            model.category = category;
        }
        if let Some(system_prompt) = changes.system_prompt {
            model.system_prompt = system_prompt;
        }
        if let Some(description) = changes.description {
            model.description = description;
        }
        if let Some(api_key) = changes.api_key {
            model.api_key = api_key;
        }
        model.updated_at = Utc::now();
        Some(model.clone())
    }

    /// Baja de un modelo. Devuelve la definición eliminada.
    pub fn remove(&self, id: &str) -> Option<ModelDefinition> {
        self.models.write().unwrap().remove(id)
    }
}

/// Cambios parciales aplicables a un modelo del catálogo.
#[derive(Debug, Default)]
pub struct ModelChanges {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub category: Option<ModelCategory>,
    pub system_prompt: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` borra la clave; `None` la deja como está.
    pub api_key: Option<Option<String>>,
}
