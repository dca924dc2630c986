//! The built-in five-stage Nextflow scaffolding pipeline.
//!
//! Stage order is fixed: planning first, then structure, tests, config, and
//! finally the workflow wiring that consumes everything before it.

use super::stage::StageSpec;

/// Name of the only tool the scaffolding stages use.
pub const CREATE_PATH_TOOL: &str = "create_path";

/// Output key conventions, in pipeline order.
pub const PROJECT_METADATA_KEY: &str = "project_metadata";
pub const MAIN_NF_SUMMARY_KEY: &str = "main_nf_summary";
pub const TEST_SUMMARY_KEY: &str = "test_summary";
pub const CONFIG_SUMMARY_KEY: &str = "config_summary";
pub const WORKFLOW_SUMMARY_KEY: &str = "workflow_summary";

/// The default five-stage scaffolding pipeline, in execution order.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        todo_stage(),
        structure_stage(),
        test_stage(),
        config_stage(),
        workflow_stage(),
    ]
}

/// Stage 1: analyze the user prompt and produce the plan. No tools.
fn todo_stage() -> StageSpec {
    StageSpec {
        id: "TodoAgent".to_string(),
        ordinal: 0,
        description: "Analyzes the user's pipeline request and produces a build plan."
            .to_string(),
        instruction: "\
You are a Nextflow pipeline planner. Analyze the user's request for a \
bioinformatics pipeline and decide on a snake_case project name and the name \
of the single main process the pipeline will run.

Respond in exactly this format and nothing else:

PROJECT_NAME: <snake_case project name>
PROCESS_NAME: <snake_case process name>

TODO LIST:
1. <first concrete step>
2. <second concrete step>
...

Every later step builds on your names, so choose them once and never change \
them. Do not create any files or folders yourself."
            .to_string(),
        allowed_tools: vec![],
        output_key: PROJECT_METADATA_KEY.to_string(),
    }
}

/// Stage 2: scaffold the directory layout and the module stub.
fn structure_stage() -> StageSpec {
    StageSpec {
        id: "StructureAgent".to_string(),
        ordinal: 1,
        description: "Creates the project directory layout and the process module."
            .to_string(),
        instruction: "\
You are a Nextflow project scaffolder. Using the PROJECT_NAME and \
PROCESS_NAME already decided, create the project skeleton with the \
create_path tool:

- the project root folder named after PROJECT_NAME
- a modules/<PROCESS_NAME> folder inside it
- a modules/<PROCESS_NAME>/main.nf file containing a minimal Nextflow \
process definition for PROCESS_NAME (process block with input, output, and \
script sections)

Create one path per tool call. If a path already exists, pick an adjusted \
name and continue; never retry the identical path. When the skeleton is in \
place, stop calling tools and reply with a short summary of the main.nf you \
wrote, restating PROJECT_NAME and PROCESS_NAME on their own lines in the \
'PROJECT_NAME: x' format."
            .to_string(),
        allowed_tools: vec![CREATE_PATH_TOOL.to_string()],
        output_key: MAIN_NF_SUMMARY_KEY.to_string(),
    }
}

/// Stage 3: add the nf-test scaffolding for the module.
fn test_stage() -> StageSpec {
    StageSpec {
        id: "TestAgent".to_string(),
        ordinal: 2,
        description: "Writes the nf-test scaffolding for the process module.".to_string(),
        instruction: "\
You are a Nextflow test author. The module stub already exists. Using the \
create_path tool, add:

- tests/<PROCESS_NAME>.nf.test under the project root, containing an nf-test \
nextflow_process block that runs the module and asserts process.success

Use the PROJECT_NAME and PROCESS_NAME already decided; never invent new \
ones. When done, reply with a short summary of the test file and what it \
asserts."
            .to_string(),
        allowed_tools: vec![CREATE_PATH_TOOL.to_string()],
        output_key: TEST_SUMMARY_KEY.to_string(),
    }
}

/// Stage 4: add nextflow.config.
fn config_stage() -> StageSpec {
    StageSpec {
        id: "ConfigAgent".to_string(),
        ordinal: 3,
        description: "Writes the pipeline configuration file.".to_string(),
        instruction: "\
You are a Nextflow configuration author. Using the create_path tool, add a \
nextflow.config file under the existing project root containing sensible \
defaults: a params block for the pipeline inputs, a process block with \
modest cpu/memory defaults, and a profiles block with a standard (local) \
profile and a docker profile.

Use the PROJECT_NAME already decided. When done, reply with a short summary \
of the parameters and profiles you configured."
            .to_string(),
        allowed_tools: vec![CREATE_PATH_TOOL.to_string()],
        output_key: CONFIG_SUMMARY_KEY.to_string(),
    }
}

/// Stage 5: wire everything into the entrypoint workflow.
fn workflow_stage() -> StageSpec {
    StageSpec {
        id: "WorkflowAgent".to_string(),
        ordinal: 4,
        description: "Writes the entrypoint workflow that wires the module together."
            .to_string(),
        instruction: "\
You are a Nextflow workflow author. Everything before you is in place: the \
module, its test, and the configuration. Using the create_path tool, add the \
entrypoint main.nf at the project root containing a workflow block that \
includes the process from modules/<PROCESS_NAME>/main.nf and invokes it with \
the params defined in nextflow.config.

Use the PROJECT_NAME and PROCESS_NAME already decided. When done, reply with \
a final summary of the complete project: every file created and how the \
pieces fit together."
            .to_string(),
        allowed_tools: vec![CREATE_PATH_TOOL.to_string()],
        output_key: WORKFLOW_SUMMARY_KEY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_five_stages_in_order() {
        let stages = default_stages();
        assert_eq!(stages.len(), 5);
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.ordinal, i);
        }
        assert_eq!(stages[0].id, "TodoAgent");
        assert_eq!(stages[4].id, "WorkflowAgent");
    }

    #[test]
    fn test_only_planning_stage_is_toolless() {
        let stages = default_stages();
        assert!(stages[0].allowed_tools.is_empty());
        for stage in &stages[1..] {
            assert_eq!(stage.allowed_tools, vec![CREATE_PATH_TOOL.to_string()]);
        }
    }

    #[test]
    fn test_output_keys_are_distinct() {
        let stages = default_stages();
        let mut keys: Vec<&str> = stages.iter().map(|s| s.output_key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_planning_stage_demands_name_contract() {
        let todo = &default_stages()[0];
        assert!(todo.instruction.contains("PROJECT_NAME:"));
        assert!(todo.instruction.contains("PROCESS_NAME:"));
        assert!(todo.instruction.contains("TODO LIST:"));
    }
}
