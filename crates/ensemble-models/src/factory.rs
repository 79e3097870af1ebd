//! Model factory for creating model instances from configuration.
//!
//! This module provides functionality to create model instances based on configuration,
//! handling API key loading from environment variables.

use crate::{MockModel, WatsonxModel};
use ensemble_abstraction::{Model, ModelError, ModelParameters};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Model type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Mock model for testing.
    Mock,
    /// IBM watsonx.ai hosted model.
    Watsonx,
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "watsonx" | "watsonx.ai" | "ibm" => Ok(Self::Watsonx),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Watsonx => write!(f, "watsonx"),
        }
    }
}

/// Model configuration.
#[derive(Clone, PartialEq)]
pub struct ModelConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "meta-llama/llama-3-70b-instruct").
    pub model_id: String,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
    /// Regional endpoint (required for watsonx).
    pub base_url: Option<String>,
    /// Project the requests are billed to (required for watsonx).
    pub project_id: Option<String>,
    /// Optional IAM host override.
    pub iam_url: Option<String>,
    /// Default generation parameters.
    pub parameters: ModelParameters,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self {
            model_type,
            model_id,
            api_key: None,
            base_url: None,
            project_id: None,
            iam_url: None,
            parameters: ModelParameters::default(),
        }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the endpoint base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Sets the project ID.
    #[must_use]
    pub fn with_project_id(mut self, project_id: String) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Sets the IAM host used for token exchange.
    #[must_use]
    pub fn with_iam_url(mut self, iam_url: String) -> Self {
        self.iam_url = Some(iam_url);
        self
    }

    /// Sets the default generation parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("model_type", &self.model_type)
            .field("model_id", &self.model_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("iam_url", &self.iam_url)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing API key
    /// or endpoint settings).
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model + Send + Sync>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        match config.model_type {
            ModelType::Mock => {
                let model = MockModel::new(config.model_id);
                Ok(Arc::new(model))
            }
            ModelType::Watsonx => {
                let base_url = config.base_url.ok_or_else(|| {
                    ModelError::UnsupportedModelProvider(
                        "base_url is required for watsonx models. Use ModelConfig::with_base_url() to set it.".to_string(),
                    )
                })?;
                let project_id = config.project_id.ok_or_else(|| {
                    ModelError::UnsupportedModelProvider(
                        "project_id is required for watsonx models. Use ModelConfig::with_project_id() to set it.".to_string(),
                    )
                })?;

                let mut model = if let Some(api_key) = config.api_key {
                    WatsonxModel::with_api_key(config.model_id, base_url, project_id, api_key)
                } else {
                    WatsonxModel::new(config.model_id, base_url, project_id)?
                };
                if let Some(iam_url) = config.iam_url {
                    model = model.with_iam_url(iam_url);
                }
                Ok(Arc::new(model.with_parameters(config.parameters)))
            }
        }
    }

    /// Creates a model instance from a model type string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the model type is unrecognized or creation fails.
    pub fn create_from_str(
        model_type_str: &str,
        model_id: String,
    ) -> Result<Arc<dyn Model + Send + Sync>, ModelError> {
        let model_type = Self::parse_type(model_type_str)?;
        Self::create(ModelConfig::new(model_type, model_id))
    }

    /// Parses a provider name.
    ///
    /// # Errors
    /// Returns `UnsupportedModelProvider` for unknown names.
    pub fn parse_type(model_type_str: &str) -> Result<ModelType, ModelError> {
        ModelType::from_str(model_type_str).map_err(|()| {
            error!(model_type = %model_type_str, "Unrecognized model type");
            ModelError::UnsupportedModelProvider(format!(
                "Unrecognized model type: {}",
                model_type_str
            ))
        })
    }
}
