//! Capsule validation
//!
//! Three layers, in order: YAML syntax, structural schema, business rules.
//! Business rules: semver versions, lowercase-hyphen names, `name@version`
//! dependency references, unique step names, dependencies reference existing
//! steps, and no circular step dependencies.

use std::collections::{HashMap, HashSet};

use anumate_types::{CapsuleDefinition, CapsuleRef};

use crate::{CompileError, CompileResult};

/// Outcome of validating a capsule definition
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse a capsule definition from YAML
pub fn parse_capsule_yaml(yaml: &str) -> CompileResult<CapsuleDefinition> {
    serde_yaml::from_str(yaml).map_err(|e| CompileError::Yaml(e.to_string()))
}

/// Whether a name is lowercase-hyphen (`[a-z0-9]` segments joined by `-`)
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Validate a capsule definition against the business rules
pub fn validate_definition(def: &CapsuleDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !is_valid_name(&def.name) {
        report
            .errors
            .push(format!("capsule name '{}' must be lowercase-hyphen", def.name));
    }

    if semver::Version::parse(&def.version).is_err() {
        report.errors.push(format!(
            "capsule version '{}' is not a valid semantic version",
            def.version
        ));
    }

    for dep in &def.dependencies {
        match CapsuleRef::parse(dep) {
            Some(r) => {
                if !is_valid_name(&r.name) {
                    report
                        .errors
                        .push(format!("dependency name '{}' must be lowercase-hyphen", r.name));
                }
                if semver::Version::parse(&r.version).is_err() {
                    report.errors.push(format!(
                        "dependency '{dep}' version is not a valid semantic version"
                    ));
                }
            }
            None => report
                .errors
                .push(format!("dependency '{dep}' must be of the form name@version")),
        }
    }

    if def.automation.steps.is_empty() {
        report.errors.push("capsule declares no steps".to_string());
    }

    if def.automation.max_parallelism == 0 {
        report
            .errors
            .push("max_parallelism must be at least 1".to_string());
    }

    let mut seen = HashSet::new();
    for step in &def.automation.steps {
        if step.name.is_empty() {
            report.errors.push("step with empty name".to_string());
            continue;
        }
        if !seen.insert(step.name.as_str()) {
            report
                .errors
                .push(format!("duplicate step name '{}'", step.name));
        }
        if step.tool.is_empty() {
            report
                .errors
                .push(format!("step '{}' has no tool", step.name));
        }
        if !def.tools.is_empty() && !def.tools.contains(&step.tool) {
            report.errors.push(format!(
                "step '{}' references tool '{}' outside the declared tool list",
                step.name, step.tool
            ));
        }
        if step.timeout_secs == Some(0) {
            report
                .warnings
                .push(format!("step '{}' declares a zero timeout", step.name));
        }
    }

    let names: HashSet<&str> = def.automation.steps.iter().map(|s| s.name.as_str()).collect();
    for step in &def.automation.steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                report.errors.push(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    step.name
                ));
            }
        }
    }

    if let Err(cycle) = check_acyclic(def) {
        report
            .errors
            .push(format!("circular step dependency involving '{cycle}'"));
    }

    report
}

// Kahn's algorithm over the step graph; returns the first stuck node on a cycle
fn check_acyclic(def: &CapsuleDefinition) -> Result<(), String> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &def.automation.steps {
        indegree.entry(step.name.as_str()).or_insert(0);
        for dep in &step.depends_on {
            *indegree.entry(step.name.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.name.as_str());
        }
    }

    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0;

    while let Some(node) = queue.pop() {
        visited += 1;
        if let Some(deps) = dependents.get(node) {
            for dependent in deps {
                let entry = indegree.get_mut(dependent).expect("node registered above");
                *entry -= 1;
                if *entry == 0 {
                    queue.push(dependent);
                }
            }
        }
    }

    if visited == indegree.len() {
        Ok(())
    } else {
        let stuck = indegree
            .iter()
            .find(|(_, d)| **d > 0)
            .map(|(n, _)| n.to_string())
            .unwrap_or_default();
        Err(stuck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anumate_types::{AutomationSpec, CapsuleStep};

    fn step(name: &str, depends_on: &[&str]) -> CapsuleStep {
        CapsuleStep {
            name: name.to_string(),
            tool: "http".to_string(),
            action: None,
            parameters: serde_json::json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            timeout_secs: Some(30),
            retries: None,
            requires_approval: false,
            idempotent: true,
        }
    }

    fn definition(steps: Vec<CapsuleStep>) -> CapsuleDefinition {
        CapsuleDefinition {
            name: "demo-capsule".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            automation: AutomationSpec {
                steps,
                max_parallelism: 4,
            },
            tools: vec![],
            policies: vec![],
            dependencies: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_valid_definition_passes() {
        let def = definition(vec![step("fetch", &[]), step("store", &["fetch"])]);
        assert!(validate_definition(&def).is_valid());
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("notify-slack"));
        assert!(is_valid_name("a1"));
        assert!(!is_valid_name("Notify"));
        assert!(!is_valid_name("-leading"));
        assert!(!is_valid_name("double--hyphen"));
        assert!(!is_valid_name("under_score"));
    }

    #[test]
    fn test_bad_semver_rejected() {
        let mut def = definition(vec![step("a", &[])]);
        def.version = "1.0".to_string();
        let report = validate_definition(&def);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("semantic version"));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let def = definition(vec![step("a", &[]), step("a", &[])]);
        let report = validate_definition(&def);
        assert!(report.errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let def = definition(vec![step("a", &["ghost"])]);
        let report = validate_definition(&def);
        assert!(report.errors.iter().any(|e| e.contains("unknown step")));
    }

    #[test]
    fn test_cycle_rejected() {
        let def = definition(vec![step("a", &["b"]), step("b", &["a"])]);
        let report = validate_definition(&def);
        assert!(report.errors.iter().any(|e| e.contains("circular")));
    }

    #[test]
    fn test_dependency_reference_format() {
        let mut def = definition(vec![step("a", &[])]);
        def.dependencies = vec!["missing-at-sign".to_string()];
        let report = validate_definition(&def);
        assert!(report.errors.iter().any(|e| e.contains("name@version")));
    }

    #[test]
    fn test_tool_outside_declared_list() {
        let mut def = definition(vec![step("a", &[])]);
        def.tools = vec!["database".to_string()];
        let report = validate_definition(&def);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("outside the declared tool list")));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
name: pay-invoice
version: 1.0.0
automation:
  steps:
    - name: validate
      tool: validator
    - name: pay
      tool: payment_gateway
      depends_on: [validate]
      requires_approval: true
      idempotent: false
tools: [validator, payment_gateway]
"#;
        let def = parse_capsule_yaml(yaml).unwrap();
        assert_eq!(def.name, "pay-invoice");
        assert_eq!(def.automation.steps.len(), 2);
        assert!(def.automation.steps[1].requires_approval);
        assert!(validate_definition(&def).is_valid());
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_capsule_yaml("steps: ["),
            Err(CompileError::Yaml(_))
        ));
    }
}
