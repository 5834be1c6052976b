use super::*;
use serial_test::serial;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text");
    assert_eq!(config.llm.model, "llama3");
    assert_eq!(config.server.bind_address(), "127.0.0.1:8000");
    assert_eq!(config.index.chunk_size, 300);
    assert_eq!(config.index.top_k, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.base_url = "not a url".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.server.host = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.index.chunk_size = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkSize(0))
    ));

    let mut invalid_config = config;
    invalid_config.index.top_k = 0;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidTopK(0))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn chat_url_appends_api_path() {
    let mut llm = LlmConfig::default();
    assert_eq!(
        llm.chat_url().expect("valid url").as_str(),
        "http://localhost:11434/api/chat"
    );

    llm.base_url = "https://gpu.example.com/ollama/".to_string();
    assert_eq!(
        llm.chat_url().expect("valid url").as_str(),
        "https://gpu.example.com/ollama/api/chat"
    );
}

#[test]
fn llm_base_url_rejects_other_schemes() {
    let mut llm = LlmConfig::default();
    assert!(matches!(
        llm.set_base_url("ftp://example.com".to_string()),
        Err(ConfigError::InvalidProtocol(_))
    ));
    assert_eq!(llm.base_url, "http://localhost:11434");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [llm]
        model = "mistral"
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.llm.model, "mistral");
    assert_eq!(parsed.llm.base_url, LlmConfig::default().base_url);
    assert_eq!(parsed.index, IndexConfig::default());
    assert_eq!(parsed.ollama, OllamaConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());
}

#[test]
fn server_and_index_setters() {
    let mut server = ServerConfig::default();
    assert!(server.set_host("0.0.0.0".to_string()).is_ok());
    assert!(server.set_port(9000).is_ok());
    assert_eq!(server.bind_address(), "0.0.0.0:9000");

    assert!(matches!(
        server.set_host("  ".to_string()),
        Err(ConfigError::InvalidHost(_))
    ));
    assert!(matches!(server.set_port(0), Err(ConfigError::InvalidPort(0))));
    assert_eq!(server.bind_address(), "0.0.0.0:9000");

    let mut index = IndexConfig::default();
    assert!(index.set_source(PathBuf::from("docs/notes.txt")).is_ok());
    assert!(index.set_path(PathBuf::from("docs/notes_index.json")).is_ok());
    assert!(index.set_chunk_size(512).is_ok());
    assert!(index.set_top_k(5).is_ok());
    assert!(index.validate().is_ok());

    assert!(matches!(
        index.set_source(PathBuf::new()),
        Err(ConfigError::InvalidPath(_))
    ));
    assert!(matches!(
        index.set_path(PathBuf::new()),
        Err(ConfigError::InvalidPath(_))
    ));
    assert!(matches!(
        index.set_chunk_size(0),
        Err(ConfigError::InvalidChunkSize(0))
    ));
    assert!(matches!(
        index.set_chunk_size(8193),
        Err(ConfigError::InvalidChunkSize(8193))
    ));
    assert!(matches!(index.set_top_k(51), Err(ConfigError::InvalidTopK(51))));

    assert_eq!(index.source, PathBuf::from("docs/notes.txt"));
    assert_eq!(index.chunk_size, 512);
    assert_eq!(index.top_k, 5);
}

#[test]
fn empty_index_paths_fail_validation() {
    let config: Config = toml::from_str("[index]\npath = \"\"\n").expect("parses");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidPath(_))
    ));
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing file falls back to defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.llm, LlmConfig::default());
    assert_eq!(config.index, IndexConfig::default());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.llm.model = "qwen2".to_string();
    config.index.top_k = 5;

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path().join("nested")).expect("should load config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[index]\nchunk_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn overrides_replace_file_values() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[
            (LLM_URL_ENV, "http://gpu-box:11434"),
            (LLM_MODEL_ENV, "mistral"),
            (EMBEDDING_MODEL_ENV, "mxbai-embed-large"),
        ]))
        .expect("overrides are valid");

    assert_eq!(config.llm.base_url, "http://gpu-box:11434");
    assert_eq!(config.llm.model, "mistral");
    assert_eq!(config.ollama.model, "mxbai-embed-large");
}

#[test]
fn blank_overrides_are_ignored() {
    let mut config = Config::default();
    config
        .apply_overrides(lookup_from(&[(LLM_MODEL_ENV, "   ")]))
        .expect("blank values are skipped");
    assert_eq!(config.llm.model, "llama3");
}

#[test]
fn invalid_override_is_rejected() {
    let mut config = Config::default();
    let result = config.apply_overrides(lookup_from(&[(LLM_URL_ENV, "localhost without scheme")]));
    assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
}

#[test]
#[serial]
fn load_with_env_reads_process_environment() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    // SAFETY: serialized with other environment-touching tests
    unsafe { env::set_var(LLM_MODEL_ENV, "phi3") };
    let config = Config::load_with_env(temp_dir.path());
    // SAFETY: see above
    unsafe { env::remove_var(LLM_MODEL_ENV) };

    assert_eq!(config.expect("should load config").llm.model, "phi3");
}
