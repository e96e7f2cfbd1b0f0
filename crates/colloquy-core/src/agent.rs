use serde::{Deserialize, Serialize};

/// The conversational agent the service fronts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub name: String,
    pub model: String,
    pub description: String,
    pub instruction: String,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            name: "assistant".into(),
            model: "gemini-2.0-flash".into(),
            description: "A helpful AI assistant".into(),
            instruction: "You are a helpful AI assistant. Respond to user questions in a clear, \
                          concise, and friendly manner. You can help with a wide variety of topics \
                          including answering questions, providing explanations, and having \
                          conversations."
                .into(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}
