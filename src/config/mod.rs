pub mod prompt;

pub use prompt::{ load_prompts, load_prompts_or_default, AssistantPrompts, PromptError };
