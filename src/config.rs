use std::env;

const DEFAULT_BUSINESS_NAME_MARKERS: &[&str] = &["assessoria", "consultoria", "juridico", "jurídico"];

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub transcribe_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub zapi_base_url: String,
    pub zapi_instance_id: Option<String>,
    pub zapi_token: Option<String>,
    pub zapi_client_token: Option<String>,
    pub webhook_secret: Option<String>,
    pub business_name_markers: Vec<String>,
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_text(key).unwrap_or_else(|| default.to_string())
}

fn resolve_database_url() -> String {
    if let Some(url) = env_text("DATABASE_URL") {
        return url;
    }
    let host = env_text("POSTGRES_HOST")
        .or_else(|| env_text("PGHOST"))
        .unwrap_or_else(|| "localhost".to_string());
    let port = env_text("POSTGRES_PORT")
        .or_else(|| env_text("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = env_text("POSTGRES_USER")
        .or_else(|| env_text("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let password = env_text("POSTGRES_PASSWORD")
        .or_else(|| env_text("PGPASSWORD"))
        .unwrap_or_default();
    let db = env_text("POSTGRES_DB")
        .or_else(|| env_text("PGDATABASE"))
        .unwrap_or_else(|| "zapi_inbox".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

pub fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_text("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(4000);
        let business_name_markers = match env_text("BUSINESS_NAME_MARKERS") {
            Some(raw) => parse_markers(&raw),
            None => DEFAULT_BUSINESS_NAME_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        };

        Self {
            port,
            database_url: resolve_database_url(),
            openai_api_key: env_text("OPENAI_API_KEY"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            chat_model: env_or("OPENAI_CHAT_MODEL", "gpt-4.1-mini"),
            transcribe_model: env_or("OPENAI_TRANSCRIBE_MODEL", "whisper-1"),
            tts_model: env_or("OPENAI_TTS_MODEL", "tts-1"),
            tts_voice: env_or("OPENAI_TTS_VOICE", "alloy"),
            zapi_base_url: env_or("ZAPI_BASE_URL", "https://api.z-api.io")
                .trim_end_matches('/')
                .to_string(),
            zapi_instance_id: env_text("ZAPI_INSTANCE_ID"),
            zapi_token: env_text("ZAPI_TOKEN"),
            zapi_client_token: env_text("ZAPI_CLIENT_TOKEN"),
            webhook_secret: env_text("WEBHOOK_SECRET"),
            business_name_markers,
        }
    }

    /// Settings for tests and local runs: no credentials, default markers.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: String::new(),
            openai_api_key: Some("test-key".to_string()),
            openai_base_url: "http://localhost".to_string(),
            chat_model: "test-model".to_string(),
            transcribe_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            zapi_base_url: "http://localhost".to_string(),
            zapi_instance_id: None,
            zapi_token: None,
            zapi_client_token: None,
            webhook_secret: None,
            business_name_markers: DEFAULT_BUSINESS_NAME_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}
