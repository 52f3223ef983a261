use super::{Config, MemorySearchConfig, MIN_WATCH_DEBOUNCE_MS};
use anyhow::Result;
use std::collections::HashSet;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn push(errors: &mut Vec<ConfigValidationError>, path: &str, message: impl Into<String>) {
    errors.push(ConfigValidationError {
        path: path.to_string(),
        message: message.into(),
    });
}

/// Validate a configuration object.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (idx, agent) in config.agents.list.iter().enumerate() {
        let id = agent.id.trim();
        if id.is_empty() {
            push(
                &mut errors,
                &format!("agents.list[{idx}].id"),
                "Agent id must not be empty",
            );
        } else if !seen.insert(id.to_string()) {
            push(
                &mut errors,
                &format!("agents.list[{idx}].id"),
                format!("Duplicate agent id '{id}'"),
            );
        }
    }

    validate_memory_search(&config.memory_search, &mut errors);

    errors
}

fn validate_memory_search(cfg: &MemorySearchConfig, errors: &mut Vec<ConfigValidationError>) {
    for (idx, path) in cfg.extra_paths.iter().enumerate() {
        if path.trim().is_empty() {
            push(
                errors,
                &format!("memorySearch.extraPaths[{idx}]"),
                "Extra path must not be empty",
            );
        }
    }

    if let Some(local) = &cfg.local {
        if local.dimensions == Some(0) {
            push(
                errors,
                "memorySearch.local.dimensions",
                "Dimensions must be greater than 0",
            );
        }
        if local.max_input_tokens == Some(0) {
            push(
                errors,
                "memorySearch.local.maxInputTokens",
                "Max input tokens must be greater than 0",
            );
        }
    }

    if let Some(chunking) = &cfg.chunking {
        if chunking.tokens == Some(0) {
            push(
                errors,
                "memorySearch.chunking.tokens",
                "Chunk size must be greater than 0",
            );
        }
        if let (Some(tokens), Some(overlap)) = (chunking.tokens, chunking.overlap) {
            if tokens > 0 && overlap >= tokens {
                push(
                    errors,
                    "memorySearch.chunking.overlap",
                    "Overlap must be smaller than the chunk size",
                );
            }
        }
    }

    if let Some(sync) = &cfg.sync {
        if let Some(ms) = sync.watch_debounce_ms {
            if ms < MIN_WATCH_DEBOUNCE_MS {
                warn!(
                    debounce_ms = ms,
                    "memorySearch.sync.watchDebounceMs below {MIN_WATCH_DEBOUNCE_MS}ms, clamping"
                );
            }
        }
    }

    if let Some(flush) = &cfg.flush {
        for (path, value) in [
            ("memorySearch.flush.deltaBytes", flush.delta_bytes),
            ("memorySearch.flush.deltaMessages", flush.delta_messages),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    warn!("{path} is {v}, treating as 0 (threshold disabled)");
                }
            }
        }
    }

    if let Some(query) = &cfg.query {
        if query.max_results == Some(0) {
            push(
                errors,
                "memorySearch.query.maxResults",
                "Max results must be greater than 0",
            );
        }
        if let Some(min) = query.min_score {
            if !min.is_finite() || !(0.0..=1.0).contains(&min) {
                push(
                    errors,
                    "memorySearch.query.minScore",
                    "Min score must be between 0 and 1",
                );
            }
        }
        if let Some(hybrid) = &query.hybrid {
            for (path, value) in [
                ("memorySearch.query.hybrid.vectorWeight", hybrid.vector_weight),
                ("memorySearch.query.hybrid.textWeight", hybrid.text_weight),
            ] {
                if let Some(v) = value {
                    if !v.is_finite() || v < 0.0 {
                        push(errors, path, "Weight must be a non-negative number");
                    }
                }
            }
            if hybrid.vector_weight == Some(0.0) && hybrid.text_weight == Some(0.0) {
                push(
                    errors,
                    "memorySearch.query.hybrid",
                    "Vector and text weights must not both be zero",
                );
            }
            if hybrid.candidate_multiplier == Some(0) {
                push(
                    errors,
                    "memorySearch.query.hybrid.candidateMultiplier",
                    "Candidate multiplier must be greater than 0",
                );
            }
            if let Some(lambda) = hybrid.mmr.as_ref().and_then(|m| m.lambda) {
                if !lambda.is_finite() || !(0.0..=1.0).contains(&lambda) {
                    push(
                        errors,
                        "memorySearch.query.hybrid.mmr.lambda",
                        "Lambda must be between 0 and 1",
                    );
                }
            }
            if let Some(half_life) = hybrid
                .temporal_decay
                .as_ref()
                .and_then(|d| d.half_life_days)
            {
                if !half_life.is_finite() || half_life <= 0.0 {
                    push(
                        errors,
                        "memorySearch.query.hybrid.temporalDecay.halfLifeDays",
                        "Half-life must be a positive number of days",
                    );
                }
            }
        }
    }
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, MemorySearchChunkingConfig, MemorySearchFlushConfig};

    fn agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            workspace: None,
            sessions_dir: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_empty());
    }

    #[test]
    fn duplicate_agent_ids_rejected() {
        let mut config = Config::default();
        config.agents.list = vec![agent("ops"), agent("ops")];
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "agents.list[1].id");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = Config::default();
        config.memory_search.chunking = Some(MemorySearchChunkingConfig {
            tokens: Some(100),
            overlap: Some(100),
        });
        let errors = validate_config(&config);
        assert_eq!(errors[0].path, "memorySearch.chunking.overlap");
    }

    #[test]
    fn bad_flush_thresholds_are_not_errors() {
        let mut config = Config::default();
        config.memory_search.flush = Some(MemorySearchFlushConfig {
            delta_bytes: Some(f64::NAN),
            delta_messages: Some(-3.0),
            ..Default::default()
        });
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn zero_weights_rejected() {
        let err = Config::from_value(serde_json::json!({
            "memorySearch": {
                "query": { "hybrid": { "vectorWeight": 0.0, "textWeight": 0.0 } }
            }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("memorySearch.query.hybrid"));
    }

    #[test]
    fn error_message_lists_every_path() {
        let config = Config::from_value(serde_json::json!({
            "memorySearch": {
                "query": { "maxResults": 0, "minScore": 2.0 }
            }
        }));
        let msg = config.unwrap_err().to_string();
        assert!(msg.contains("memorySearch.query.maxResults"));
        assert!(msg.contains("memorySearch.query.minScore"));
    }
}
