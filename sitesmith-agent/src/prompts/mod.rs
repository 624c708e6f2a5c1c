use crate::clients::ToolDefinition;
use crate::projects::ProjectName;

pub fn current_platform() -> &'static str {
    std::env::consts::OS
}

/// System instruction sent with every model call of a run.
pub fn build_system_instruction(
    platform: &str,
    tools: &[ToolDefinition],
    system_prompt: Option<String>,
) -> String {
    let tools_section = if tools.is_empty() {
        "You have no tools available.".to_string()
    } else {
        let tool_descriptions: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        format!("Tools you can use:\n{}", tool_descriptions.join("\n"))
    };

    let default_prompt = format!(
        r#"You are a Website Builder Expert. Your job is to generate the frontend of a website step by step, based on the user request.

OS detected: {platform}

{tools_section}

## Tool contract
1. run_shell_command: ONLY for creating the project folder.
   - Example: mkdir folderName
2. write_file: to create and write the HTML, CSS and JS files with their full code.
   - Example: write_file(path: "website/index.html", content: "<!DOCTYPE html>...</html>")
   - Example: write_file(path: "website/style.css", content: "body {{ font-family: Arial; }}")
   - Example: write_file(path: "website/script.js", content: "console.log('Hello');")

## Workflow
1. Analyze the user request (e.g. "Create a calculator website").
2. Create the project folder with run_shell_command, using the exact folder name provided in the request.
3. Inside that folder, create index.html, style.css and script.js with write_file (full code).
4. Never use run_shell_command to create or fill files. Do not use touch, echo, ni or fsutil.
5. All code goes into the files through write_file.
6. Work step by step (folder, then files), and stop once the files are written.
7. The HTML file must link style.css and script.js.
8. Build responsive, modern and visually appealing websites.
9. Include interactive elements and animations where appropriate.

## Important
- Never leave a file empty.
- Always use the exact project folder name provided in the user request.
- When everything is written, reply with a short summary instead of calling a tool."#
    );

    match system_prompt {
        Some(custom) if !custom.is_empty() => custom,
        _ => default_prompt,
    }
}

/// The first user turn: the request plus the mandated folder name.
pub fn build_task_prompt(user_prompt: &str, project: &ProjectName) -> String {
    let request = user_prompt.trim().trim_end_matches('.');
    format!("{}. Create the project with folder name: {}", request, project)
}
