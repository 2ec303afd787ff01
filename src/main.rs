// Módulos de la aplicación
mod admins;
mod api;
mod app_state;
mod catalog;
mod config;
mod docs;
mod escalation;
mod logsink;
mod models;
mod parser;
mod pipeline;
mod prompt;
mod provider;

use std::sync::Arc;

use crate::app_state::AppState;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Abrir los almacenes (documentos, logs de chat, administradores)
    let documents = Arc::new(
        docs::FsDocumentStore::open(&cfg.uploads_dir, &cfg.docs_index_path)
            .expect("Error abriendo el almacén de documentos"),
    );
    let chat_log = Arc::new(
        logsink::JsonlChatLog::open(&cfg.chat_log_path)
            .expect("Error abriendo el log de chat"),
    );
    let admins = Arc::new(
        admins::AdminRoster::open(&cfg.admins_path)
            .expect("Error abriendo la nómina de administradores"),
    );

    // 4. Sembrar el catálogo de modelos y montar el pipeline de chat
    let catalog = Arc::new(catalog::ModelCatalog::with_defaults());
    let pipeline = Arc::new(pipeline::ChatPipeline::new(
        catalog.clone(),
        documents.clone(),
        chat_log.clone(),
        Arc::new(provider::OpenRouterProvider),
        &cfg,
    ));

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        catalog,
        documents: documents.clone(),
        chat_log,
        admins,
        pipeline,
    };

    // 6. Configurar el router de la API y el servicio de ficheros subidos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .nest_service("/uploads", ServeDir::new(documents.uploads_dir()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .unwrap();
    info!("🚀 Servidor escuchando en http://{}", &cfg.server_addr);

    axum::serve(listener, app).await.unwrap();
}
