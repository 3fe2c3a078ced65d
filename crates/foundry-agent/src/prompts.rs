//! Role prompts and task rendering

use foundry_core::agent::{Role, TaskContext};

const PLANNER: &str = "You plan the next features of a software project that builds itself. \
Reply with one short, self-contained feature approach per line. \
No numbering, no bullet points, no commentary.";

const BUILDER: &str = "You implement exactly one feature. \
Reply with the complete code in a single fenced code block. \
To save the code into the project, put its relative path after the language \
on the opening fence, for example ```python backend/services/cache.py. \
Protected core files are queued for human review, so prefer new files.";

const REFINER: &str = "You improve existing code so that it scores higher. \
The score out of 10 adds functionality (tests pass, 0-4), quality (static analysis, 0-2), \
performance (0-2) and safety (security scan, 0-2). \
Reply with the complete revised code in a single fenced code block, \
keeping the file path on the opening fence if the original had one.";

pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Planner => PLANNER,
        Role::Builder => BUILDER,
        Role::Refiner => REFINER,
    }
}

/// Task followed by its context; `code` is fenced, other keys are listed
pub fn render_task(task: &str, context: &TaskContext) -> String {
    let mut prompt = task.to_string();
    if context.is_empty() {
        return prompt;
    }

    let mut code = None;
    prompt.push_str("\n\nContext:");
    for (key, value) in context.iter() {
        if key == "code" {
            code = Some(value);
            continue;
        }
        prompt.push_str(&format!("\n- {key}: {value}"));
    }
    if let Some(code) = code {
        prompt.push_str("\n\nCurrent code:\n```\n");
        prompt.push_str(code);
        if !code.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push_str("```");
    }
    prompt
}
