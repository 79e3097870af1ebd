//! Crew definition files.
//!
//! A crew is described in TOML: models and tools are declared once under an
//! id, agents refer to them by id, and tasks refer to agents by id.
//!
//! ```toml
//! [models.llama]
//! provider = "watsonx"
//! model_id = "meta-llama/llama-3-70b-instruct"
//! url = "https://us-south.ml.cloud.ibm.com"
//! project_id = "..."
//!
//! [[agents]]
//! id = "writer"
//! role = "Senior Speech Writer"
//! goal = "..."
//! backstory = "..."
//! llm = "llama"
//!
//! [[tasks]]
//! description = "..."
//! expected_output = "..."
//! agent = "writer"
//! output_file = "task2output.txt"
//! ```

use ensemble_abstraction::{Model, ModelParameters};
use ensemble_models::watsonx::WATSONX_API_KEY_ENV;
use ensemble_models::{ModelConfig, ModelFactory, ModelType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::crew::Crew;
use crate::error::CrewConfigError;
use crate::task::Task;
use crate::tools::{SERPER_API_KEY_ENV, SerperSearchTool, Tool};

/// Result type for crew definition operations
pub type Result<T> = std::result::Result<T, CrewConfigError>;

/// The crew that ships with the binary: a quantum computing researcher and a
/// keynote speech writer on watsonx.ai.
pub const BUILTIN_CREW_TOML: &str = include_str!("../crews/quantum-keynote.toml");

/// A whole crew definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewDefinition {
    /// Crew-wide settings
    #[serde(default)]
    pub crew: CrewSection,
    /// Models by id
    #[serde(default)]
    pub models: BTreeMap<String, ModelDefinition>,
    /// Tools by id
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDefinition>,
    /// Agents in crew order
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Tasks in execution order
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

/// `[crew]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewSection {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Log task progress at info level
    #[serde(default)]
    pub verbose: bool,
}

/// `[models.<id>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Provider name (`watsonx`, `mock`)
    pub provider: String,
    /// Model identifier at the provider
    pub model_id: String,
    /// Regional endpoint
    #[serde(default)]
    pub url: Option<String>,
    /// Project the inference is billed to
    #[serde(default)]
    pub project_id: Option<String>,
    /// IAM host override
    #[serde(default)]
    pub iam_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Default generation parameters
    #[serde(default)]
    pub parameters: ModelParameters,
}

/// `[tools.<id>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolDefinition {
    /// Serper web search
    Serper {
        /// Environment variable holding the API key
        #[serde(default)]
        api_key_env: Option<String>,
        /// Endpoint override
        #[serde(default)]
        base_url: Option<String>,
        /// Results requested when the agent does not say
        #[serde(default)]
        n_results: Option<u64>,
    },
}

/// `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Id tasks use to refer to the agent
    pub id: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    /// Model id
    pub llm: String,
    /// Model id used to structure tool arguments
    #[serde(default)]
    pub function_calling_llm: Option<String>,
    /// Tool ids
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub allow_delegation: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub max_iter: Option<u32>,
}

/// `[[tasks]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub description: String,
    pub expected_output: String,
    /// Agent id
    pub agent: String,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    /// Names of earlier tasks to use as context
    #[serde(default)]
    pub context: Option<Vec<String>>,
}

/// Options for turning a definition into a runnable crew.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Replace every model with an offline mock.
    pub mock_models: bool,
    /// Directory relative output files are placed in.
    pub output_dir: Option<PathBuf>,
}

impl CrewDefinition {
    /// Loads and validates a crew file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| CrewConfigError::Io { path: path.to_path_buf(), source })?;
        let definition = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), agents = definition.agents.len(), tasks = definition.tasks.len(), "Loaded crew definition");
        Ok(definition)
    }

    /// Parses and validates a crew definition.
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed or the definition is inconsistent.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let definition: Self = toml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    /// The crew that ships with the binary.
    ///
    /// # Errors
    /// Only fails if the bundled file is broken.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CREW_TOML)
    }

    /// Display name, falling back to "crew".
    pub fn name(&self) -> &str {
        self.crew.name.as_deref().unwrap_or("crew")
    }

    /// Checks references and required fields.
    ///
    /// # Errors
    /// Returns `CrewConfigError::Invalid` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        for (id, model) in &self.models {
            require(id, "model id")?;
            require(&model.model_id, &format!("model '{}' model_id", id))?;
            let provider = ModelFactory::parse_type(&model.provider)
                .map_err(|e| invalid(format!("model '{}': {}", id, e)))?;
            if provider == ModelType::Watsonx {
                if model.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(invalid(format!("model '{}' needs a url", id)));
                }
                if model.project_id.as_deref().is_none_or(|p| p.trim().is_empty()) {
                    return Err(invalid(format!("model '{}' needs a project_id", id)));
                }
            }
        }

        if self.agents.is_empty() {
            return Err(invalid("at least one agent is required"));
        }
        if self.tasks.is_empty() {
            return Err(invalid("at least one task is required"));
        }

        let mut agent_ids = HashSet::new();
        let mut roles = HashSet::new();
        for agent in &self.agents {
            require(&agent.id, "agent id")?;
            require(&agent.role, &format!("agent '{}' role", agent.id))?;
            require(&agent.goal, &format!("agent '{}' goal", agent.id))?;
            require(&agent.backstory, &format!("agent '{}' backstory", agent.id))?;
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(invalid(format!("duplicate agent id '{}'", agent.id)));
            }
            if !roles.insert(agent.role.to_lowercase()) {
                return Err(invalid(format!("duplicate agent role '{}'", agent.role)));
            }
            for model_id in std::iter::once(&agent.llm).chain(&agent.function_calling_llm) {
                if !self.models.contains_key(model_id) {
                    return Err(invalid(format!("agent '{}' uses unknown model '{}'", agent.id, model_id)));
                }
            }
            for tool_id in &agent.tools {
                if !self.tools.contains_key(tool_id) {
                    return Err(invalid(format!("agent '{}' uses unknown tool '{}'", agent.id, tool_id)));
                }
            }
        }

        let mut task_names = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            let label = task.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
            require(&task.description, &format!("task '{}' description", label))?;
            require(&task.expected_output, &format!("task '{}' expected_output", label))?;
            if !agent_ids.contains(task.agent.as_str()) {
                return Err(invalid(format!("task '{}' uses unknown agent '{}'", label, task.agent)));
            }
            for name in task.context.iter().flatten() {
                if !task_names.contains(name.as_str()) {
                    return Err(invalid(format!(
                        "task '{}' uses '{}' as context, which is not an earlier task",
                        label, name
                    )));
                }
            }
            if let Some(name) = &task.name {
                require(name, "task name")?;
                if !task_names.insert(name.as_str()) {
                    return Err(invalid(format!("duplicate task name '{}'", name)));
                }
            }
        }

        Ok(())
    }

    /// Builds a runnable crew, reading credentials from the process environment.
    ///
    /// # Errors
    /// Returns an error if a credential is missing or a model cannot be created.
    pub fn build(&self, options: &BuildOptions) -> Result<Crew> {
        self.build_with_env(options, |var| std::env::var(var).ok())
    }

    /// Builds a runnable crew, looking credentials up with `env`.
    ///
    /// # Errors
    /// Returns an error if a credential is missing or a model cannot be created.
    pub fn build_with_env<F>(&self, options: &BuildOptions, env: F) -> Result<Crew>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut models: HashMap<&str, Arc<dyn Model + Send + Sync>> = HashMap::new();
        for (id, definition) in &self.models {
            models.insert(id.as_str(), build_model(id, definition, options, &env)?);
        }

        let mut tools: HashMap<&str, Tool> = HashMap::new();
        for (id, definition) in &self.tools {
            tools.insert(id.as_str(), build_tool(id, definition, options, &env)?);
        }

        let mut agents: HashMap<&str, Arc<Agent>> = HashMap::new();
        let mut ordered_agents = Vec::with_capacity(self.agents.len());
        for definition in &self.agents {
            let mut agent = Agent::new(
                definition.role.clone(),
                definition.goal.clone(),
                definition.backstory.clone(),
                lookup(&models, &definition.llm)?,
            )
            .with_allow_delegation(definition.allow_delegation)
            .with_verbose(definition.verbose);

            if let Some(fc) = &definition.function_calling_llm {
                agent = agent.with_function_calling_llm(lookup(&models, fc)?);
            }
            for tool_id in &definition.tools {
                agent = agent.with_tool(lookup(&tools, tool_id)?);
            }
            if let Some(max_iter) = definition.max_iter {
                agent = agent.with_max_iter(max_iter);
            }

            let agent = Arc::new(agent);
            agents.insert(definition.id.as_str(), agent.clone());
            ordered_agents.push(agent);
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for definition in &self.tasks {
            let mut task = Task::new(
                definition.description.clone(),
                definition.expected_output.clone(),
                lookup(&agents, &definition.agent)?,
            );
            if let Some(name) = &definition.name {
                task = task.with_name(name.clone());
            }
            if let Some(path) = &definition.output_file {
                task = task.with_output_file(resolve_output_path(path, options.output_dir.as_deref()));
            }
            if let Some(context) = &definition.context {
                task = task.with_context(context.iter().cloned());
            }
            tasks.push(task);
        }

        Ok(Crew::new(ordered_agents, tasks).with_verbose(self.crew.verbose))
    }
}

fn build_model<F>(
    id: &str,
    definition: &ModelDefinition,
    options: &BuildOptions,
    env: &F,
) -> Result<Arc<dyn Model + Send + Sync>>
where
    F: Fn(&str) -> Option<String>,
{
    let model_error = |source| CrewConfigError::Model { id: id.to_string(), source };

    let provider = ModelFactory::parse_type(&definition.provider).map_err(model_error)?;
    if options.mock_models || provider == ModelType::Mock {
        return ModelFactory::create(ModelConfig::new(ModelType::Mock, definition.model_id.clone()))
            .map_err(model_error);
    }

    let var = definition.api_key_env.as_deref().unwrap_or(WATSONX_API_KEY_ENV);
    let api_key = env(var).ok_or_else(|| CrewConfigError::MissingCredential {
        var: var.to_string(),
        needed_by: format!("model '{}'", id),
    })?;

    let mut config = ModelConfig::new(provider, definition.model_id.clone())
        .with_api_key(api_key)
        .with_parameters(definition.parameters.clone());
    if let Some(url) = &definition.url {
        config = config.with_base_url(url.clone());
    }
    if let Some(project_id) = &definition.project_id {
        config = config.with_project_id(project_id.clone());
    }
    if let Some(iam_url) = &definition.iam_url {
        config = config.with_iam_url(iam_url.clone());
    }
    ModelFactory::create(config).map_err(model_error)
}

fn build_tool<F>(id: &str, definition: &ToolDefinition, options: &BuildOptions, env: &F) -> Result<Tool>
where
    F: Fn(&str) -> Option<String>,
{
    match definition {
        ToolDefinition::Serper { api_key_env, base_url, n_results } => {
            let var = api_key_env.as_deref().unwrap_or(SERPER_API_KEY_ENV);
            let api_key = match env(var) {
                Some(key) => key,
                // Mock agents never call tools, so a missing key is only a warning.
                None if options.mock_models => {
                    warn!(tool = %id, var = %var, "Search API key not set; searches will fail");
                    String::new()
                }
                None => {
                    return Err(CrewConfigError::MissingCredential {
                        var: var.to_string(),
                        needed_by: format!("tool '{}'", id),
                    });
                }
            };

            let mut search = SerperSearchTool::new(api_key);
            if let Some(url) = base_url {
                search = search.with_base_url(url.clone());
            }
            if let Some(n) = n_results {
                search = search.with_n_results(*n);
            }
            Ok(search.into_tool())
        }
    }
}

fn resolve_output_path(path: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn lookup<T: Clone>(items: &HashMap<&str, T>, id: &str) -> Result<T> {
    items.get(id).cloned().ok_or_else(|| invalid(format!("unknown reference '{}'", id)))
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(invalid(format!("{} cannot be empty", what)))
    } else {
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CrewConfigError {
    CrewConfigError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_abstraction::DecodingMethod;

    fn env_with_keys(var: &str) -> Option<String> {
        match var {
            "WATSONX_APIKEY" => Some("watsonx-key".to_string()),
            "SERPER_API_KEY" => Some("serper-key".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_builtin_definition_values() {
        let definition = CrewDefinition::builtin().unwrap();
        assert_eq!(definition.name(), "quantum-keynote");
        assert!(definition.crew.verbose);

        let llama = &definition.models["llama"];
        assert_eq!(llama.model_id, "meta-llama/llama-3-70b-instruct");
        assert_eq!(llama.url.as_deref(), Some("https://us-south.ml.cloud.ibm.com"));
        assert_eq!(llama.project_id.as_deref(), Some("853780be-1a79-4185-8642-bbd8370910fd"));
        assert_eq!(llama.parameters.decoding_method, Some(DecodingMethod::Greedy));
        assert_eq!(llama.parameters.max_new_tokens, Some(500));

        let granite = &definition.models["granite"];
        assert_eq!(granite.model_id, "ibm/granite-13b-instruct-v2");
        assert_eq!(granite.parameters, llama.parameters);

        let researcher = &definition.agents[0];
        assert_eq!(researcher.role, "Senior AI Researcher");
        assert_eq!(researcher.goal, "Find promising research in the field of quantum computing.");
        assert_eq!(researcher.llm, "llama");
        assert_eq!(researcher.function_calling_llm.as_deref(), Some("granite"));
        assert_eq!(researcher.tools, vec!["search".to_string()]);
        assert!(!researcher.allow_delegation);

        let writer = &definition.agents[1];
        assert_eq!(writer.role, "Senior Speech Writer");
        assert!(writer.tools.is_empty());
        assert!(writer.function_calling_llm.is_none());

        assert_eq!(definition.tasks[0].output_file.as_deref(), Some(Path::new("task1output.txt")));
        assert_eq!(definition.tasks[1].output_file.as_deref(), Some(Path::new("task2output.txt")));
        assert_eq!(definition.tasks[1].agent, "writer");
    }

    #[test]
    fn test_build_builtin_crew() {
        let definition = CrewDefinition::builtin().unwrap();
        let crew = definition.build_with_env(&BuildOptions::default(), env_with_keys).unwrap();

        assert!(crew.verbose());
        assert_eq!(crew.agents().len(), 2);
        let researcher = &crew.agents()[0];
        assert_eq!(researcher.llm().model_id(), "meta-llama/llama-3-70b-instruct");
        assert_eq!(
            researcher.function_calling_llm().map(|m| m.model_id()),
            Some("ibm/granite-13b-instruct-v2")
        );
        assert_eq!(researcher.tools()[0].name, "Search the internet");
        assert!(Arc::ptr_eq(crew.tasks()[0].agent(), researcher));
        assert!(Arc::ptr_eq(crew.tasks()[1].agent(), &crew.agents()[1]));
        crew.validate().unwrap();
    }

    #[test]
    fn test_missing_credentials() {
        let definition = CrewDefinition::builtin().unwrap();

        match definition.build_with_env(&BuildOptions::default(), |_| None) {
            Err(CrewConfigError::MissingCredential { var, .. }) => assert_eq!(var, "WATSONX_APIKEY"),
            other => panic!("Expected MissingCredential, got {:?}", other.map(|_| ())),
        }

        let only_watsonx = |var: &str| (var == "WATSONX_APIKEY").then(|| "k".to_string());
        match definition.build_with_env(&BuildOptions::default(), only_watsonx) {
            Err(CrewConfigError::MissingCredential { var, needed_by }) => {
                assert_eq!(var, "SERPER_API_KEY");
                assert_eq!(needed_by, "tool 'search'");
            }
            other => panic!("Expected MissingCredential, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_mock_build_needs_no_credentials_and_reroots_outputs() {
        let definition = CrewDefinition::builtin().unwrap();
        let options = BuildOptions { mock_models: true, output_dir: Some(PathBuf::from("/tmp/run")) };
        let crew = definition.build_with_env(&options, |_| None).unwrap();

        assert_eq!(crew.agents()[0].llm().model_id(), "meta-llama/llama-3-70b-instruct");
        assert_eq!(crew.tasks()[0].output_file(), Some(Path::new("/tmp/run/task1output.txt")));
    }

    #[test]
    fn test_absolute_output_paths_are_kept() {
        assert_eq!(
            resolve_output_path(Path::new("/abs/out.txt"), Some(Path::new("/tmp"))),
            PathBuf::from("/abs/out.txt")
        );
        assert_eq!(resolve_output_path(Path::new("out.txt"), None), PathBuf::from("out.txt"));
    }

    #[test]
    fn test_validation_errors() {
        let base = r#"
            [models.m]
            provider = "mock"
            model_id = "mock-1"

            [[agents]]
            id = "a"
            role = "Analyst"
            goal = "g"
            backstory = "b"
            llm = "m"

            [[tasks]]
            description = "d"
            expected_output = "e"
            agent = "a"
        "#;
        CrewDefinition::from_toml_str(base).unwrap();

        let cases = [
            (base.replace("llm = \"m\"", "llm = \"missing\""), "unknown model"),
            (base.replace("agent = \"a\"", "agent = \"nobody\""), "unknown agent"),
            (base.replace("goal = \"g\"", "goal = \"\""), "goal cannot be empty"),
            (base.replace("provider = \"mock\"", "provider = \"openai\""), "Unrecognized model type"),
            (base.replace("provider = \"mock\"", "provider = \"watsonx\""), "needs a url"),
            (format!("{}\n[[tasks]]\ndescription = \"d\"\nexpected_output = \"e\"\nagent = \"a\"\ncontext = [\"x\"]\n", base), "not an earlier task"),
            (base.replace("[[tasks]]", "tools = [\"web\"]\n\n[[tasks]]"), "unknown tool"),
        ];

        for (content, expected) in cases {
            match CrewDefinition::from_toml_str(&content) {
                Err(e) => assert!(e.to_string().contains(expected), "{} does not mention {}", e, expected),
                Ok(_) => panic!("Expected error mentioning '{}'", expected),
            }
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(CrewDefinition::from_toml_str("[[agents]"), Err(CrewConfigError::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crew.toml");
        std::fs::write(&path, BUILTIN_CREW_TOML).unwrap();
        assert_eq!(CrewDefinition::load(&path).unwrap(), CrewDefinition::builtin().unwrap());

        assert!(matches!(
            CrewDefinition::load(dir.path().join("missing.toml")),
            Err(CrewConfigError::Io { .. })
        ));
    }
}
