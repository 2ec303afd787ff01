//! Parseo y normalización de la respuesta cruda del modelo.
//!
//! El JSON que devuelve el LLM se trata como entrada NO confiable: se
//! parsea a una estructura tipada y después se re-aplican en el servidor
//! las invariantes que el prompt sólo pide por las buenas (fuentes vacías
//! cuando la pregunta no procede, respuesta de reserva cuando no hay
//! contexto, `escalated` calculado aquí y no por el modelo).

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::escalation;
use crate::models::{ChatDecision, Classification, ModelCategory};

/// Respuesta fija cuando el modelo no encontró la respuesta en el contexto.
pub const FALLBACK_ANSWER: &str = "Your question is either out of context or out of scope. I am referring you to a facilitator for further assistance.";

/// El texto del proveedor no pudo recuperarse como una decisión válida.
#[derive(Debug, Error)]
#[error("respuesta del modelo malformada: {0}")]
pub struct MalformedResponse(pub String);

/// Decisión tal y como la declaró el modelo, ya tipada pero sin normalizar.
/// Un campo `escalated` devuelto por el modelo se descarta sin leerlo.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedDecision {
    #[serde(deserialize_with = "flag")]
    pub appropriate: bool,
    #[serde(rename = "inScope", deserialize_with = "flag")]
    pub in_scope: bool,
    #[serde(rename = "answerInContext", deserialize_with = "flag")]
    pub answer_in_context: bool,
    #[serde(default)]
    pub sources: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub language_env: Option<String>,
    #[serde(default)]
    pub question_type: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default, deserialize_with = "opt_flag")]
    pub has_code: Option<bool>,
}

/// Parsea el texto crudo del proveedor: quita vallas de código Markdown y
/// exige un único objeto JSON con las claves obligatorias.
pub fn parse(raw: &str) -> Result<ParsedDecision, MalformedResponse> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| MalformedResponse(e.to_string()))
}

/// Aplica las invariantes de la política sobre la decisión parseada.
pub fn normalize(parsed: ParsedDecision, category: ModelCategory) -> ChatDecision {
    let technical = category == ModelCategory::TechnicalLogical;

    // El alcance de la categoría técnica está definido como siempre cierto.
    let in_scope = technical || parsed.in_scope;
    let appropriate = parsed.appropriate;

    let sources = if !appropriate || !in_scope {
        Vec::new()
    } else {
        dedup_preserving_order(parsed.sources)
    };

    let answer = if !parsed.answer_in_context && !technical {
        FALLBACK_ANSWER.to_string()
    } else {
        parsed.answer
    };

    let escalated = escalation::post_decision_escalate(appropriate, in_scope, category);

    ChatDecision {
        appropriate,
        in_scope,
        answer_in_context: parsed.answer_in_context,
        sources,
        answer,
        escalated,
        classification: Classification {
            language_env: parsed.language_env,
            question_type: parsed.question_type,
            framework: parsed.framework,
            has_code: parsed.has_code,
        },
    }
}

fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn dedup_preserving_order(sources: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Acepta 0/1 o booleanos para las banderas de la decisión.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    flag_value(&value)
        .ok_or_else(|| serde::de::Error::custom("se esperaba 0/1 o un booleano"))
}

/// Variante opcional y tolerante: un valor irreconocible queda en `None`
/// (la clasificación es telemetría, no contrato).
fn opt_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(flag_value))
}

fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision_json(appropriate: u8, in_scope: u8, in_context: u8) -> String {
        format!(
            r#"{{"appropriate": {appropriate}, "inScope": {in_scope}, "answerInContext": {in_context}, "sources": ["faq.pdf"], "answer": "According to faq.pdf, go to Settings."}}"#
        )
    }

    #[test]
    fn parsea_json_con_vallas_markdown() {
        let raw = format!("```json\n{}\n```", decision_json(1, 1, 1));
        let parsed = parse(&raw).unwrap();
        assert!(parsed.appropriate && parsed.in_scope && parsed.answer_in_context);
        assert_eq!(parsed.sources, vec!["faq.pdf"]);
    }

    #[test]
    fn parsea_vallas_sin_etiqueta_de_lenguaje() {
        let raw = format!("```\n{}\n```", decision_json(1, 1, 1));
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn acepta_banderas_booleanas_y_numericas() {
        let raw = r#"{"appropriate": true, "inScope": 0, "answerInContext": false, "answer": "x"}"#;
        let parsed = parse(raw).unwrap();
        assert!(parsed.appropriate);
        assert!(!parsed.in_scope);
        assert!(!parsed.answer_in_context);
        assert!(parsed.sources.is_empty());
    }

    #[test]
    fn rechaza_texto_que_no_es_json() {
        assert!(parse("I am sorry, I cannot help with that.").is_err());
    }

    #[test]
    fn rechaza_claves_obligatorias_ausentes() {
        // Falta answerInContext.
        let raw = r#"{"appropriate": 1, "inScope": 1, "answer": "x"}"#;
        assert!(parse(raw).is_err());
    }

    #[test]
    fn rechaza_banderas_fuera_de_rango() {
        let raw = r#"{"appropriate": 2, "inScope": 1, "answerInContext": 1, "answer": "x"}"#;
        assert!(parse(raw).is_err());
    }

    #[test]
    fn ignora_el_campo_escalated_del_modelo() {
        let raw = r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "answer": "ok", "escalated": 1}"#;
        let decision = normalize(parse(raw).unwrap(), ModelCategory::NavigationSupport);
        // Todo en orden: el servidor decide que no hay escalado, diga lo
        // que diga el modelo.
        assert!(!decision.escalated);
    }

    #[test]
    fn vacia_fuentes_cuando_no_es_apropiada() {
        let raw = decision_json(0, 1, 1);
        let decision = normalize(parse(&raw).unwrap(), ModelCategory::PolicyCompliance);
        assert!(decision.sources.is_empty());
        assert!(decision.escalated);
    }

    #[test]
    fn vacia_fuentes_cuando_esta_fuera_de_alcance() {
        let raw = decision_json(1, 0, 1);
        let decision = normalize(parse(&raw).unwrap(), ModelCategory::PolicyCompliance);
        assert!(decision.sources.is_empty());
        assert!(decision.escalated);
    }

    #[test]
    fn fuerza_la_respuesta_de_reserva_sin_contexto() {
        let raw = decision_json(1, 1, 0);
        let decision = normalize(parse(&raw).unwrap(), ModelCategory::NavigationSupport);
        assert_eq!(decision.answer, FALLBACK_ANSWER);
        assert!(!decision.escalated);
    }

    #[test]
    fn la_categoria_tecnica_conserva_su_respuesta_sin_contexto() {
        let raw = decision_json(1, 1, 0);
        let decision = normalize(parse(&raw).unwrap(), ModelCategory::TechnicalLogical);
        assert_eq!(decision.answer, "According to faq.pdf, go to Settings.");
        assert!(!decision.escalated);
    }

    #[test]
    fn la_categoria_tecnica_fuerza_el_alcance() {
        let raw = decision_json(1, 0, 1);
        let decision = normalize(parse(&raw).unwrap(), ModelCategory::TechnicalLogical);
        assert!(decision.in_scope);
        assert!(!decision.escalated);
        assert_eq!(decision.sources, vec!["faq.pdf"]);
    }

    #[test]
    fn deduplica_fuentes_conservando_el_orden() {
        let raw = r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "sources": ["a.pdf", "b.pdf", "a.pdf"], "answer": "ok"}"#;
        let decision = normalize(parse(raw).unwrap(), ModelCategory::NavigationSupport);
        assert_eq!(decision.sources, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn conserva_los_campos_de_clasificacion() {
        let raw = r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "answer": "ok",
            "language_env": "javascript", "question_type": "debugging", "framework": "react", "has_code": true}"#;
        let decision = normalize(parse(raw).unwrap(), ModelCategory::TechnicalLogical);
        assert_eq!(decision.classification.language_env.as_deref(), Some("javascript"));
        assert_eq!(decision.classification.framework.as_deref(), Some("react"));
        assert_eq!(decision.classification.has_code, Some(true));
    }

    #[test]
    fn clasificacion_irreconocible_queda_en_none() {
        let raw = r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "answer": "ok", "has_code": "maybe"}"#;
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.has_code, None);
    }
}
