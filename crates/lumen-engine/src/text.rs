//! Prompt templates and reply cleanup for the text-model operations.

pub const OPTIMIZE_TEMPERATURE: f64 = 0.7;
pub const EMPTY_OPTIMIZE_REPLY: &str = "Could not generate prompt.";

pub fn optimize_system_instruction(tone: &str, category: &str) -> String {
    format!(
        "You are an expert prompt engineer. Convert raw ideas into professional prompts.\n\
         Category: {}\n\
         Target Tone: {}\n\
         Format: Return ONLY the optimized prompt text. \
         Do not include markdown formatting or explanations.",
        category.trim(),
        tone.trim()
    )
}

pub fn app_code_prompt(name: &str, description: &str, features: &[String]) -> String {
    let features = features
        .iter()
        .map(|feature| feature.trim())
        .filter(|feature| !feature.is_empty())
        .collect::<Vec<&str>>()
        .join(", ");
    format!(
        r#"Create a single-file React Functional Component for an app named "{name}".
Description: {description}
Features: {features}

CRITICAL RULES FOR BROWSER COMPATIBILITY:
1. DO NOT import React. Assume 'React', 'useState', 'useEffect', 'useRef' are globally available.
2. Use 'lucide-react' variables from window.lucideReact (e.g., const {{ Camera }} = window.lucideReact;).
3. Export the component as 'default'.
4. Use Tailwind CSS for ALL styling.
5. Return ONLY the code. No markdown blocks. No 'import' statements at the top.
6. Make the UI look modern, dark mode, professional.
7. Ensure the code is complete and has no syntax errors.

Example Format:
const {{ useState, useEffect }} = React;
const {{ User, Settings }} = window.lucideReact || {{}};

export default function App() {{
  return <div className="p-4 bg-slate-900 text-white">Hello</div>
}}
"#,
        name = name.trim(),
        description = description.trim(),
    )
}

/// Makes a model reply loadable as a browser module: no fences, no imports,
/// and a default export.
pub fn sanitize_app_code(raw: &str) -> String {
    let kept: Vec<&str> = raw
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("```") && !is_import_line(trimmed)
        })
        .collect();
    let code = kept.join("\n");
    let code = code.trim();

    if code.contains("export default") {
        return code.to_string();
    }
    if code.contains("function App") {
        return code.replacen("function App", "export default function App", 1);
    }
    format!("export default {code}").trim().to_string()
}

fn is_import_line(line: &str) -> bool {
    line.starts_with("import ") || (line.starts_with("import{") && line.contains(" from "))
}
