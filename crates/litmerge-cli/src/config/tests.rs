#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.ingestion.topic_keywords, ["endometriosis"]);
        assert_eq!(config.ingestion.dedup_threshold, 0.9);
        assert_eq!(config.ingestion.chunk_size, 1000);
        assert_eq!(config.ingestion.chunk_overlap, 200);
        assert_eq!(config.ingestion.min_delay_ms, 1_000);
        assert_eq!(config.ingestion.max_delay_ms, 3_000);
        assert_eq!(config.ingestion.text_unit_source, "pubmed-script");
        assert_eq!(config.logging.filter, "litmerge=debug,info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_default_embedding_backend() {
        let embedding = EmbeddingSection::default();
        assert!(embedding.enabled);
        assert_eq!(embedding.backend, EmbeddingBackend::OpenAi);
        assert_eq!(embedding.model, "text-embedding-3-small");
        assert_eq!(embedding.dim, 1536);
        assert_eq!(embedding.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let config = Config::from_toml(
            r#"
            [ingestion]
            topic_keywords = ["endometriosis", "adenomyosis"]
            dedup_threshold = 0.95

            [ingestion.extra_entities]
            "&#946;" = "β"

            [embedding]
            backend = "ollama"
            model = "nomic-embed-text"
            dim = 768
            base_url = "http://localhost:11434"

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.ingestion.topic_keywords.len(), 2);
        assert_eq!(config.ingestion.chunk_size, 1000);
        assert_eq!(config.ingestion.extra_entities.get("&#946;").map(String::as_str), Some("β"));
        assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
        assert_eq!(config.embedding.batch_size, 32);
        assert!(config.logging.json);
        assert_eq!(config.sources.max_results, 200);
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        assert!(Config::from_toml("[ingestion]\ndedup_threshold = 0.0").is_err());
        assert!(Config::from_toml("[ingestion]\ndedup_threshold = 1.5").is_err());
        assert!(Config::from_toml("[ingestion]\ndedup_threshold = 1.0").is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        assert!(Config::from_toml("[ingestion]\nchunk_size = 100\nchunk_overlap = 100").is_err());
    }

    #[test]
    fn test_blank_env_var_name_is_no_secret() {
        assert!(secret_from_env(Some("  ")).is_none());
        assert!(secret_from_env(None).is_none());
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/litmerge.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
