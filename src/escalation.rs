//! Política de escalado a un facilitador humano.
//!
//! Dos contratos puros:
//!   - `should_pre_escalate`: filtro de palabras sensibles sobre la consulta
//!     cruda. Se ejecuta SIEMPRE antes de resolver el modelo o cargar
//!     documentos; si dispara, el proveedor LLM nunca llega a invocarse.
//!   - `post_decision_escalate`: escalado derivado de las banderas de la
//!     decisión ya parseada.

use crate::models::ModelCategory;

/// Palabras clave que desvían la consulta directamente a un humano.
pub const SENSITIVE_KEYWORDS: [&str; 5] =
    ["bursary", "money", "payment", "suicide", "depressed"];

/// Mensaje fijo devuelto cuando el filtro de palabras sensibles dispara.
pub const PRE_ESCALATION_MESSAGE: &str = "I've detected this is a sensitive or financial query. I am escalating this to a CodeTribe human facilitator immediately.";

/// Comprueba si la consulta contiene alguna palabra sensible
/// (subcadena, sin distinguir mayúsculas).
pub fn should_pre_escalate(query: &str) -> bool {
    let lowered = query.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Escalado posterior a la decisión: una pregunta inapropiada o fuera de
/// alcance escala, salvo que la categoría sea "Technical & Logical" (su
/// alcance se considera trivialmente satisfecho y nunca escala por esta vía).
pub fn post_decision_escalate(
    appropriate: bool,
    in_scope: bool,
    category: ModelCategory,
) -> bool {
    (!appropriate || !in_scope) && category != ModelCategory::TechnicalLogical
}
