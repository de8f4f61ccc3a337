use crate::tool::ToolRegistry;

/// Builds the system prompt used when none is configured.
pub(super) fn default_system_prompt(
    name: &str,
    description: &str,
    registry: &ToolRegistry,
) -> String {
    let mut prompt = format!(
        "You are {name}, an AI assistant.\n\n{description}\n\n\
         You are designed to be helpful, harmless, and honest. You can \
         engage in conversations, answer questions, help with tasks, and \
         provide information on a wide variety of topics."
    );

    if registry.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\nYou have access to the following tools:\n");
    for tool in registry.definitions() {
        prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    prompt.push_str(
        "\nAlways think step by step and use tools when they would be \
         helpful to complete the user's request. Be efficient and avoid \
         unnecessary tool calls.",
    );
    prompt
}
