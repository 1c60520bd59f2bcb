//! Named system-prompt loading with caching
//!
//! Prompt texts ship with the desktop bundle as markdown files; a bare dev
//! checkout falls back to the compiled-in diagnostic prompt so the agent
//! still works.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Compiled-in fallback used when no prompt file is present
const DEFAULT_DIAGNOSTIC_PROMPT: &str = "\
You are a desktop support diagnostician. The user describes a problem with \
their computer, usually networking. Work bottom-up through the network stack: \
verify the adapter first, then IP configuration, then gateway reachability, \
then internet reachability, then DNS. Call one diagnostic tool at a time and \
read its result before deciding the next step. When a remediation tool fixes \
the problem, verify it by re-running the relevant probe. Keep final answers \
short and concrete, and tell the user exactly what was found and what was \
done.";

/// Available agent types with specialized prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(dead_code)] // Specialized prompts are selected by the desktop shell
pub enum AgentType {
    Default,
    Triage,
    Diagnostic,
    Remediation,
    QuickCheck,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Default => "default",
            AgentType::Triage => "triage",
            AgentType::Diagnostic => "diagnostic",
            AgentType::Remediation => "remediation",
            AgentType::QuickCheck => "quick_check",
        }
    }
}

/// Loads prompt files from a resource directory, caching by agent type
pub struct PromptStore {
    prompts_dir: PathBuf,
    cache: Mutex<HashMap<AgentType, String>>,
}

impl PromptStore {
    pub fn new(prompts_dir: PathBuf) -> Self {
        Self {
            prompts_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the prompt for an agent type. Reads `<dir>/<type>_agent.md` once
    /// and caches it; missing files fall back to the built-in prompt.
    pub fn load(&self, agent_type: AgentType) -> String {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(prompt) = cache.get(&agent_type) {
                return prompt.clone();
            }
        }

        let path = self
            .prompts_dir
            .join(format!("{}_agent.md", agent_type.as_str()));
        let prompt = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                tracing::debug!(path = %path.display(), "Prompt file missing, using built-in");
                DEFAULT_DIAGNOSTIC_PROMPT.to_string()
            }
        };

        self.cache
            .lock()
            .unwrap()
            .insert(agent_type, prompt.clone());
        prompt
    }
}
