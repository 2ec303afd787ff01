use std::sync::Arc;

use crate::{
    admins::AdminRoster, catalog::ModelCatalog, config::AppConfig, docs::FsDocumentStore,
    logsink::JsonlChatLog, pipeline::ChatPipeline,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<ModelCatalog>,
    pub documents: Arc<FsDocumentStore>,
    pub chat_log: Arc<JsonlChatLog>,
    pub admins: Arc<AdminRoster>,
    pub pipeline: Arc<ChatPipeline>,
}
