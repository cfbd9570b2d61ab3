//! Execution-brief rendering.
//!
//! Composes the markdown brief a worker receives when it picks up a task:
//! the relevant plan section, the task's effective dependencies, summaries
//! of prior completed tasks, and any attached context files. Pure text
//! composition — no locking, no IO.

/// Inputs for [`build_spec_content`]. Summaries and context files are
/// `(label, text)` pairs supplied by the caller.
#[derive(Debug, Default)]
pub struct BriefInputs<'a> {
    pub task_id: &'a str,
    pub task_name: &'a str,
    /// The plan section covering this task, verbatim.
    pub plan_section: &'a str,
    /// Effective dependency folder ids, in order.
    pub dependencies: &'a [String],
    /// `(task id, summary)` of previously completed tasks.
    pub completed: &'a [(String, String)],
    /// `(file name, contents)` of attached context files.
    pub context_files: &'a [(String, String)],
}

/// Render the execution brief for a task.
pub fn build_spec_content(inputs: &BriefInputs) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Task {} — {}\n\n", inputs.task_id, inputs.task_name));

    out.push_str("## Plan\n\n");
    let plan = inputs.plan_section.trim();
    if plan.is_empty() {
        out.push_str("_No plan section provided._\n");
    } else {
        out.push_str(plan);
        out.push('\n');
    }

    out.push_str("\n## Dependencies\n\n");
    if inputs.dependencies.is_empty() {
        out.push_str("_None — this task can start immediately._\n");
    } else {
        for dep in inputs.dependencies {
            out.push_str(&format!("- {dep}\n"));
        }
    }

    if !inputs.completed.is_empty() {
        out.push_str("\n## Completed so far\n\n");
        for (id, summary) in inputs.completed {
            let summary = summary.trim();
            if summary.is_empty() {
                out.push_str(&format!("- **{id}**\n"));
            } else {
                out.push_str(&format!("- **{id}**: {summary}\n"));
            }
        }
    }

    if !inputs.context_files.is_empty() {
        out.push_str("\n## Context\n");
        for (name, contents) in inputs.context_files {
            out.push_str(&format!("\n### {name}\n\n```\n"));
            out.push_str(contents.trim_end());
            out.push_str("\n```\n");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_sections() {
        let deps = vec!["01-setup".to_string()];
        let completed = vec![("01-setup".to_string(), "Schema in place.".to_string())];
        let ctx = vec![("notes.md".to_string(), "Use the v2 API.".to_string())];
        let brief = build_spec_content(&BriefInputs {
            task_id: "02-endpoints",
            task_name: "Implement API endpoints",
            plan_section: "2. Implement API endpoints [depends: 1]",
            dependencies: &deps,
            completed: &completed,
            context_files: &ctx,
        });

        assert!(brief.starts_with("# Task 02-endpoints — Implement API endpoints"));
        assert!(brief.contains("## Plan"));
        assert!(brief.contains("- 01-setup"));
        assert!(brief.contains("**01-setup**: Schema in place."));
        assert!(brief.contains("### notes.md"));
        assert!(brief.contains("Use the v2 API."));
    }

    #[test]
    fn empty_inputs_still_render() {
        let brief = build_spec_content(&BriefInputs {
            task_id: "01-setup",
            task_name: "Setup",
            ..Default::default()
        });
        assert!(brief.contains("_No plan section provided._"));
        assert!(brief.contains("_None — this task can start immediately._"));
        assert!(!brief.contains("## Context"));
    }
}
