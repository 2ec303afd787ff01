//! Modelos de dominio (categorías, modelos configurados, documentos,
//! decisiones del pipeline y registros de chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Categoría de un modelo configurado. Determina las reglas de alcance y
/// escalado que aplica el pipeline.
///
/// El parseo normaliza las grafías históricas ("Technical  & Logic",
/// "Technical & Logic") a la variante canónica; fuera de esta frontera
/// sólo existen las tres variantes del enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelCategory {
    #[serde(rename = "Policy & Compliance")]
    PolicyCompliance,
    #[serde(rename = "Technical & Logical")]
    TechnicalLogical,
    #[serde(rename = "Navigation & Support")]
    NavigationSupport,
}

impl ModelCategory {
    /// Parsea una categoría tolerando espacios duplicados y mayúsculas.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.to_lowercase().as_str() {
            "policy & compliance" => Ok(Self::PolicyCompliance),
            "technical & logical" | "technical & logic" => Ok(Self::TechnicalLogical),
            "navigation & support" => Ok(Self::NavigationSupport),
            other => Err(anyhow::anyhow!("Categoría de modelo desconocida: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyCompliance => "Policy & Compliance",
            Self::TechnicalLogical => "Technical & Logical",
            Self::NavigationSupport => "Navigation & Support",
        }
    }
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Un modelo LLM configurado: persona, categoría y vínculo con el proveedor.
/// La clave de API nunca se serializa hacia el exterior.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub category: ModelCategory,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Un documento institucional subido por un administrador. El `name`
/// original actúa como clave de citación; `content` es el texto extraído
/// completo que se inyecta en cada prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "fileType")]
    pub file_type: String,
    pub url: String,
    pub content: String,
    #[serde(rename = "storagePath")]
    pub storage_path: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Cuerpo de una petición de chat.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatQuery {
    pub query: String,
    #[serde(rename = "modelType")]
    pub model_type: String,
}

/// Campos de clasificación que el modelo devuelve para analítica.
/// Son opcionales: su ausencia nunca invalida la respuesta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub language_env: Option<String>,
    pub question_type: Option<String>,
    pub framework: Option<String>,
    pub has_code: Option<bool>,
}

/// Decisión estructurada y ya normalizada de una consulta: las banderas de
/// la política de tres etapas, las fuentes citadas y la respuesta final.
/// `escalated` lo calcula siempre el servidor, nunca el modelo.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDecision {
    pub appropriate: bool,
    pub in_scope: bool,
    pub answer_in_context: bool,
    pub sources: Vec<String>,
    pub answer: String,
    pub escalated: bool,
    pub classification: Classification,
}

/// Registro persistido de una conversación completada, tal y como lo
/// consume la pantalla de analítica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogRecord {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub source: String,
    pub inscope: bool,
    pub incontext: bool,
    pub appropriate: bool,
    pub modelused: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub language_env: Option<String>,
    pub question_type: Option<String>,
    pub framework: Option<String>,
    pub has_code: Option<bool>,
}

impl ChatLogRecord {
    /// Deriva el registro de log de una decisión normalizada.
    pub fn from_decision(question: &str, model_id: &str, decision: &ChatDecision) -> Self {
        let source = if decision.sources.is_empty() {
            "None".to_string()
        } else {
            decision.sources.join(", ")
        };
        Self {
            id: Uuid::new_v4(),
            question: question.to_string(),
            answer: decision.answer.clone(),
            source,
            inscope: decision.in_scope,
            incontext: decision.answer_in_context,
            appropriate: decision.appropriate,
            modelused: model_id.to_string(),
            created_at: Utc::now(),
            language_env: decision.classification.language_env.clone(),
            question_type: decision.classification.question_type.clone(),
            framework: decision.classification.framework.clone(),
            has_code: decision.classification.has_code,
        }
    }
}
