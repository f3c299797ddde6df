use crate::routes::{auth, chat, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "parley-server",
    description = "Authenticated streaming chat relay for OpenAI-compatible model endpoints",
    version = "0.1.0",
    contact(name = "parley", url = "https://github.com/parley-chat/parley")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(auth::AuthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}
