//! Orquestación de una consulta de chat, de punta a punta:
//!
//!   1. Filtro de palabras sensibles (siempre primero; si dispara, el
//!      proveedor nunca se invoca y no se carga ningún documento).
//!   2. Resolución del modelo en el catálogo.
//!   3. Carga del corpus documental completo.
//!   4. Composición del prompt e invocación del proveedor (con tiempo
//!      máximo de espera; sin reintentos).
//!   5. Parseo + normalización de la decisión.
//!   6. Registro en el log (mejor esfuerzo: su fallo no afecta a la
//!      respuesta) y respuesta al llamante.
//!
//! La duración que se devuelve mide sólo la llamada al proveedor, que es
//! lo que muestra la pantalla de analítica.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use thiserror::Error;
use tracing::{error, info};

use crate::catalog::ModelCatalog;
use crate::config::AppConfig;
use crate::docs::DocumentContextLoader;
use crate::escalation;
use crate::logsink::LogSink;
use crate::models::{ChatDecision, ChatLogRecord, ChatQuery};
use crate::parser::{self, MalformedResponse};
use crate::prompt;
use crate::provider::CompletionProvider;

/// Taxonomía de errores del pipeline. El manejador HTTP decide el estado y
/// el mensaje visible; aquí sólo viaja el detalle operativo.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("modelo desconocido: {0}")]
    ModelNotFound(String),
    #[error("no se pudieron cargar los documentos: {0}")]
    Documents(#[source] anyhow::Error),
    #[error("el proveedor LLM falló: {0}")]
    Provider(#[source] anyhow::Error),
    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

/// Resultado de una consulta que llegó a término.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// El filtro de seguridad desvió la consulta antes de tocar el modelo.
    PreEscalated { answer: &'static str },
    /// Decisión normalizada más la duración de la llamada al proveedor.
    Answered { decision: ChatDecision, duration: String },
}

pub struct ChatPipeline {
    catalog: Arc<ModelCatalog>,
    documents: Arc<dyn DocumentContextLoader>,
    sink: Arc<dyn LogSink>,
    provider: Arc<dyn CompletionProvider>,
    provider_timeout: Duration,
    max_context_chars: usize,
}

impl ChatPipeline {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        documents: Arc<dyn DocumentContextLoader>,
        sink: Arc<dyn LogSink>,
        provider: Arc<dyn CompletionProvider>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            catalog,
            documents,
            sink,
            provider,
            provider_timeout: cfg.provider_timeout,
            max_context_chars: cfg.max_context_chars,
        }
    }

    pub async fn handle(&self, query: &ChatQuery) -> Result<ChatOutcome, ChatError> {
        // El filtro de seguridad corre antes de resolver nada más: una
        // consulta sensible no debe llegar jamás al proveedor.
        if escalation::should_pre_escalate(&query.query) {
            info!("Consulta sensible desviada a un facilitador humano.");
            return Ok(ChatOutcome::PreEscalated {
                answer: escalation::PRE_ESCALATION_MESSAGE,
            });
        }

        let model = self
            .catalog
            .get(&query.model_type)
            .ok_or_else(|| ChatError::ModelNotFound(query.model_type.clone()))?;

        let documents = self
            .documents
            .load_all()
            .await
            .map_err(ChatError::Documents)?;

        let system_prompt = prompt::compose(&model, &documents, self.max_context_chars);

        let started = Instant::now();
        let raw = match tokio::time::timeout(
            self.provider_timeout,
            self.provider.invoke(&model, &system_prompt, &query.query),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(ChatError::Provider(e)),
            Err(_) => {
                return Err(ChatError::Provider(anyhow!(
                    "tiempo de espera agotado tras {:?}",
                    self.provider_timeout
                )))
            }
        };
        let duration = format_elapsed(started.elapsed());

        let decision = parser::normalize(parser::parse(&raw)?, model.category);

        // El log es telemetría de mejor esfuerzo: si falla, se reporta y la
        // respuesta sigue su curso.
        let record = ChatLogRecord::from_decision(&query.query, &model.id, &decision);
        if let Err(e) = self.sink.append(&record).await {
            error!("No se pudo persistir el registro de chat: {e:#}");
        }

        Ok(ChatOutcome::Answered { decision, duration })
    }
}

/// Formato legible de la latencia del proveedor, p. ej. "1.4s".
fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRecord, ModelCategory, ModelDefinition};
    use crate::parser::FALLBACK_ANSWER;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    // --- Dobles de prueba ---

    /// Proveedor determinista que devuelve siempre la misma respuesta y
    /// cuenta las invocaciones.
    struct StubProvider {
        response: String,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        async fn invoke(
            &self,
            _model: &ModelDefinition,
            _system_prompt: &str,
            _user_message: &str,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct StaticDocs(Vec<DocumentRecord>);

    #[async_trait]
    impl DocumentContextLoader for StaticDocs {
        async fn load_all(&self) -> anyhow::Result<Vec<DocumentRecord>> {
            Ok(self.0.clone())
        }
    }

    /// Sumidero en memoria que captura los registros emitidos.
    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<ChatLogRecord>>,
    }

    #[async_trait]
    impl LogSink for MemorySink {
        async fn append(&self, record: &ChatLogRecord) -> anyhow::Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Sumidero que siempre falla, para comprobar que el log nunca tumba
    /// la respuesta.
    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn append(&self, _record: &ChatLogRecord) -> anyhow::Result<()> {
            Err(anyhow!("almacén de logs no disponible"))
        }
    }

    // --- Utilidades ---

    fn test_config() -> AppConfig {
        AppConfig {
            server_addr: "127.0.0.1:0".into(),
            uploads_dir: "uploads".into(),
            docs_index_path: "data/documents.json".into(),
            chat_log_path: "data/chat_logs.jsonl".into(),
            admins_path: "data/admins.json".into(),
            provider_timeout: Duration::from_secs(5),
            max_context_chars: 120_000,
        }
    }

    fn catalog_with(id: &str, category: ModelCategory) -> Arc<ModelCatalog> {
        let catalog = ModelCatalog::new();
        let now = Utc::now();
        catalog
            .insert(ModelDefinition {
                id: id.to_string(),
                name: id.to_string(),
                full_name: format!("vendor/{id}:free"),
                api_key: Some("sk-test".into()),
                category,
                system_prompt: "persona".into(),
                description: String::new(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        Arc::new(catalog)
    }

    fn faq_doc() -> DocumentRecord {
        DocumentRecord {
            id: Uuid::new_v4(),
            name: "faq.pdf".into(),
            file_type: "application/pdf".into(),
            url: "/uploads/faq.pdf".into(),
            content: "To reset password, go to Settings > Security.".into(),
            storage_path: "faq.pdf".into(),
            created_at: Utc::now(),
        }
    }

    fn pipeline(
        catalog: Arc<ModelCatalog>,
        docs: Vec<DocumentRecord>,
        sink: Arc<dyn LogSink>,
        provider: Arc<dyn CompletionProvider>,
    ) -> ChatPipeline {
        ChatPipeline::new(catalog, Arc::new(StaticDocs(docs)), sink, provider, &test_config())
    }

    fn chat(query: &str, model: &str) -> ChatQuery {
        ChatQuery {
            query: query.to_string(),
            model_type: model.to_string(),
        }
    }

    // --- Escenarios ---

    #[test]
    fn responde_con_cita_cuando_hay_contexto() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "sources": ["faq.pdf"], "answer": "According to faq.pdf, go to Settings > Security.", "escalated": 0}"#,
        );
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink.clone(),
            provider.clone(),
        );

        let outcome = tokio_test::block_on(
            p.handle(&chat("How do I reset my password?", "trinity")),
        )
        .unwrap();

        let ChatOutcome::Answered { decision, duration } = outcome else {
            panic!("se esperaba una respuesta completa");
        };
        assert!(decision.answer_in_context);
        assert!(decision.answer.contains("faq.pdf"));
        assert_eq!(decision.sources, vec!["faq.pdf"]);
        assert!(!decision.escalated);
        assert!(duration.ends_with('s'));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn una_consulta_sensible_nunca_toca_el_proveedor() {
        let provider = StubProvider::new("{}");
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink.clone(),
            provider.clone(),
        );

        let outcome = tokio_test::block_on(
            p.handle(&chat("I need a bursary, please help with money", "trinity")),
        )
        .unwrap();

        assert_eq!(
            outcome,
            ChatOutcome::PreEscalated {
                answer: escalation::PRE_ESCALATION_MESSAGE
            }
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn el_filtro_de_seguridad_aplica_tambien_a_la_categoria_tecnica() {
        let provider = StubProvider::new("{}");
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("nemotron", ModelCategory::TechnicalLogical),
            vec![],
            sink,
            provider.clone(),
        );

        let outcome =
            tokio_test::block_on(p.handle(&chat("I am depressed about my build", "nemotron")))
                .unwrap();
        assert!(matches!(outcome, ChatOutcome::PreEscalated { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fuera_de_alcance_escala_y_pierde_las_fuentes() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 0, "answerInContext": 0, "sources": ["faq.pdf"], "answer": "The weather is sunny."}"#,
        );
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("stepfun", ModelCategory::PolicyCompliance),
            vec![faq_doc()],
            sink.clone(),
            provider,
        );

        let outcome = tokio_test::block_on(
            p.handle(&chat("What's the weather today?", "stepfun")),
        )
        .unwrap();

        let ChatOutcome::Answered { decision, .. } = outcome else {
            panic!("se esperaba una respuesta completa");
        };
        assert!(!decision.in_scope);
        assert!(decision.sources.is_empty());
        assert!(decision.escalated);
        assert_eq!(decision.answer, FALLBACK_ANSWER);

        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].source, "None");
        assert!(!records[0].inscope);
    }

    #[test]
    fn la_categoria_tecnica_no_escala_ni_sin_contexto() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 0, "answerInContext": 0, "answer": "Check the TypeError stack trace step by step."}"#,
        );
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("nemotron", ModelCategory::TechnicalLogical),
            vec![],
            sink,
            provider,
        );

        let outcome = tokio_test::block_on(
            p.handle(&chat("My React build fails with a TypeError", "nemotron")),
        )
        .unwrap();

        let ChatOutcome::Answered { decision, .. } = outcome else {
            panic!("se esperaba una respuesta completa");
        };
        // El alcance de la categoría técnica siempre se fuerza a cierto y
        // conserva su respuesta aunque no haya contexto documental.
        assert!(decision.in_scope);
        assert!(!decision.escalated);
        assert_eq!(decision.answer, "Check the TypeError stack trace step by step.");
    }

    #[test]
    fn un_modelo_desconocido_es_error_de_cliente_sin_efectos() {
        let provider = StubProvider::new("{}");
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink.clone(),
            provider.clone(),
        );

        let err = tokio_test::block_on(p.handle(&chat("hello", "ggml-7b"))).unwrap_err();
        assert!(matches!(err, ChatError::ModelNotFound(ref id) if id == "ggml-7b"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn una_respuesta_malformada_no_se_registra() {
        let provider = StubProvider::new("I am sorry, I cannot produce JSON today.");
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink.clone(),
            provider,
        );

        let err = tokio_test::block_on(p.handle(&chat("hello", "trinity"))).unwrap_err();
        assert!(matches!(err, ChatError::Malformed(_)));
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn el_fallo_del_log_no_afecta_a_la_respuesta() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "sources": [], "answer": "ok"}"#,
        );
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![],
            Arc::new(FailingSink),
            provider,
        );

        let outcome = tokio_test::block_on(p.handle(&chat("hello", "trinity"))).unwrap();
        assert!(matches!(outcome, ChatOutcome::Answered { .. }));
    }

    #[test]
    fn la_decision_es_identica_entre_invocaciones() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "sources": ["faq.pdf"], "answer": "According to faq.pdf, done."}"#,
        );
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink,
            provider,
        );

        let first = tokio_test::block_on(p.handle(&chat("q", "trinity"))).unwrap();
        let second = tokio_test::block_on(p.handle(&chat("q", "trinity"))).unwrap();

        // La duración varía; la decisión debe ser idéntica byte a byte.
        let (ChatOutcome::Answered { decision: a, .. }, ChatOutcome::Answered { decision: b, .. }) =
            (first, second)
        else {
            panic!("se esperaban respuestas completas");
        };
        assert_eq!(a, b);
    }

    #[test]
    fn decision_y_registro_cuentan_lo_mismo() {
        let provider = StubProvider::new(
            r#"{"appropriate": 1, "inScope": 1, "answerInContext": 1, "sources": ["faq.pdf", "handbook.pdf"], "answer": "See faq.pdf and handbook.pdf.", "language_env": "javascript", "has_code": false}"#,
        );
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(
            catalog_with("trinity", ModelCategory::NavigationSupport),
            vec![faq_doc()],
            sink.clone(),
            provider,
        );

        let outcome = tokio_test::block_on(p.handle(&chat("q", "trinity"))).unwrap();
        let ChatOutcome::Answered { decision, .. } = outcome else {
            panic!("se esperaba una respuesta completa");
        };

        let records = sink.records.lock().unwrap();
        let record = &records[0];
        assert_eq!(record.source, decision.sources.join(", "));
        assert_eq!(record.inscope, decision.in_scope);
        assert_eq!(record.incontext, decision.answer_in_context);
        assert_eq!(record.appropriate, decision.appropriate);
        assert_eq!(record.modelused, "trinity");
        assert_eq!(record.language_env.as_deref(), Some("javascript"));
        assert_eq!(record.has_code, Some(false));
    }

    #[test]
    fn formatea_la_duracion_con_un_decimal() {
        assert_eq!(format_elapsed(Duration::from_millis(1400)), "1.4s");
        assert_eq!(format_elapsed(Duration::from_millis(50)), "0.1s");
        assert_eq!(format_elapsed(Duration::from_secs(12)), "12.0s");
    }
}
