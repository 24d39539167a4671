use anyhow::{Context, Result};
use elocute_live::gemini::DEFAULT_MODEL;
use elocute_live::{LiveConfig, PracticeSentence, Provider, ProviderSettings};
use serde::Deserialize;
use std::path::Path;

/// Contents of the settings file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub live: LiveConfig,
    pub sentences: Vec<PracticeSentence>,
}

impl SettingsFile {
    /// Load `path`, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Combine the file with the environment into provider settings.
    ///
    /// The key comes from the file, then `GOOGLE_API_KEY`, then `GEMINI_API_KEY`.
    pub fn provider_settings(&self, model_override: Option<&str>) -> Result<ProviderSettings> {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => std::env::var("GOOGLE_API_KEY")
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!("GOOGLE_API_KEY or GEMINI_API_KEY environment variable not set")
                })?,
        };
        let model = model_override.or(self.model.as_deref()).unwrap_or(DEFAULT_MODEL);

        let mut settings = ProviderSettings::new(Provider::Gemini, api_key, model);
        if let Some(endpoint) = &self.endpoint {
            settings = settings.with_endpoint(endpoint.clone());
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Sentences from the command line, else from the file.
    pub fn practice_sentences(&self, from_cli: &[String]) -> Vec<PracticeSentence> {
        if from_cli.is_empty() {
            return self.sentences.clone();
        }
        from_cli
            .iter()
            .zip(1u32..)
            .map(|(text, id)| PracticeSentence::new(id, text.clone()))
            .collect()
    }
}
