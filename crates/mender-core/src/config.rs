use std::collections::HashMap;

use anyhow::Result;

use crate::harness::TechStack;

/// Full application configuration.
/// Non-sensitive fields have working defaults; sensitive fields (API keys)
/// come from env/.env only.
#[derive(Debug, Clone)]
pub struct Config {
    // Web
    pub web_bind: String,
    pub web_port: u16,

    // Repository under healing
    /// Identity, e.g. "acme/web-ui". Used in PR bodies and job records.
    pub repo: String,
    /// Readable path to the working tree the harness copies from.
    pub repo_path: String,
    pub base_branch: String,
    pub tech_stack: TechStack,

    // Healing budget
    pub max_attempts: u32,
    /// Max concurrently running healing jobs.
    pub worker_concurrency: u32,

    // Reasoning backend
    /// "anthropic" (default) or "ollama".
    pub backend: String,
    pub model: String,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Per-request timeout for reasoning-service calls.
    pub request_timeout_s: u64,

    // Delivery
    /// When false, resolved jobs skip PR creation (validation still runs).
    pub delivery_enabled: bool,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let tech_stack = TechStack::parse(&get_str("TECH_STACK", &dotenv, "fullstack"))
            .unwrap_or(TechStack::Fullstack);

        Ok(Config {
            web_bind: get_str("WEB_BIND", &dotenv, "127.0.0.1"),
            web_port: get_u16("WEB_PORT", &dotenv, 8000),
            repo: get_str("REPO", &dotenv, ""),
            repo_path: get_str("REPO_PATH", &dotenv, "."),
            base_branch: get_str("BASE_BRANCH", &dotenv, "main"),
            tech_stack,
            max_attempts: get_u32("MAX_ATTEMPTS", &dotenv, 3).max(1),
            worker_concurrency: get_u32("WORKER_CONCURRENCY", &dotenv, 4).max(1),
            backend: get_str("BACKEND", &dotenv, "anthropic"),
            model: get_str("MODEL", &dotenv, "claude-sonnet-4-6"),
            anthropic_api_key: get_str("ANTHROPIC_API_KEY", &dotenv, ""),
            anthropic_base_url: get_str(
                "ANTHROPIC_BASE_URL",
                &dotenv,
                "https://api.anthropic.com",
            ),
            ollama_base_url: get_str("OLLAMA_BASE_URL", &dotenv, "http://localhost:11434"),
            ollama_model: get_str("OLLAMA_MODEL", &dotenv, "qwen2.5-coder"),
            request_timeout_s: get_u64("REQUEST_TIMEOUT_S", &dotenv, 120),
            delivery_enabled: get_bool("DELIVERY_ENABLED", &dotenv, true),
        })
    }
}
