//! Composición del prompt de sistema por petición.
//!
//! El prompt es el "protocolo" real entre el servidor y el modelo: persona,
//! marcador de categoría, el corpus documental completo serializado y el
//! bloque fijo de requisitos de respuesta. Es un mecanismo de dirección,
//! no una garantía: el parser re-valida todo lo que el prompt pide.

use serde::Serialize;
use tracing::warn;

use crate::models::{DocumentRecord, ModelDefinition};
use crate::parser::FALLBACK_ANSWER;

/// Dominios de documentación externos que la categoría técnica puede citar.
pub const REFERENCE_ALLOWLIST: [&str; 6] = [
    "https://react.dev",
    "https://angular.dev",
    "https://www.typescriptlang.org",
    "https://developer.mozilla.org",
    "https://www.npmjs.com",
    "https://www.w3schools.com",
];

#[derive(Serialize)]
struct ContextDoc<'a> {
    name: &'a str,
    content: &'a str,
}

/// Construye el prompt de sistema completo para un modelo y el corpus
/// documental vigente. `max_context_chars` acota el tamaño del contexto
/// serializado; el contenido sobrante se trunca (los documentos van de más
/// reciente a más antiguo, así que se recorta por el final).
pub fn compose(
    model: &ModelDefinition,
    documents: &[DocumentRecord],
    max_context_chars: usize,
) -> String {
    let context_json = serialize_context(documents, max_context_chars);
    let allowlist = REFERENCE_ALLOWLIST.join(", ");

    format!(
        r#"{persona}

MODEL_CATEGORY: {category}

You are answering on behalf of the CodeTribe LMS. Use ONLY the following documents as your source of truth. Each entry has the document's file "name" and its extracted "content":
{context_json}

Mandatory Response Requirements: answer these three questions, in order.
1. Is the question appropriate content for the LMS? Answer with 0 or 1 ("appropriate").
2. Is the question in scope, meaning it relates to the documents provided? Answer with 0 or 1 ("inScope"). If MODEL_CATEGORY is "Technical & Logical" the question is always in scope, so answer 1.
3. Is the answer found within the documents provided? Answer with 0 or 1 ("answerInContext").

Respond with a single valid JSON object and nothing else, using exactly these keys:
{{"appropriate": 0 or 1, "inScope": 0 or 1, "answerInContext": 0 or 1, "sources": ["file name", ...], "answer": "your answer here", "escalated": 0 or 1, "language_env": "...", "question_type": "...", "framework": "...", "has_code": true or false}}

Rules:
- If "appropriate" is 0 or "inScope" is 0, "sources" MUST be an empty list and you must not answer the question.
- When you use a document, reference its file name inline in "answer" and list it in "sources". Only cite file names that appear in the documents above.
- If "answerInContext" is 0, "answer" must be exactly: "{fallback}"
- Never generate code.
- If MODEL_CATEGORY is "Technical & Logical": never escalate. You may include external documentation links in "answer", but only from these sites, and verify each URL before including it: {allowlist}
- "language_env", "question_type", "framework" and "has_code" classify the question for analytics; use short lowercase values, or null when they do not apply."#,
        persona = model.system_prompt,
        category = model.category,
        context_json = context_json,
        fallback = FALLBACK_ANSWER,
        allowlist = allowlist,
    )
}

/// Serializa el corpus como un array JSON de {name, content}, aplicando el
/// presupuesto de caracteres sobre los contenidos.
fn serialize_context(documents: &[DocumentRecord], max_context_chars: usize) -> String {
    let mut remaining = max_context_chars;
    let mut truncated: Vec<&str> = Vec::new();
    let mut entries = Vec::with_capacity(documents.len());

    for doc in documents {
        let content_len = doc.content.chars().count();
        let content = if content_len <= remaining {
            remaining -= content_len;
            doc.content.as_str()
        } else {
            truncated.push(&doc.name);
            let kept = truncate_chars(&doc.content, remaining);
            remaining = 0;
            kept
        };
        entries.push(ContextDoc {
            name: &doc.name,
            content,
        });
    }

    if !truncated.is_empty() {
        warn!(
            "Contexto documental por encima de {} caracteres; contenido truncado en: {}",
            max_context_chars,
            truncated.join(", ")
        );
    }

    // La serialización de strings no puede fallar.
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
