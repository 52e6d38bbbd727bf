use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_REGION: &str = "us-east-2";
pub const DEFAULT_GATEWAY_ID: &str = "ifeniowvpb";
pub const DEFAULT_STAGE: &str = "prod";
pub const DEFAULT_ACCOUNT_ID: &str = "412677576136";

/// Identifiers and timings shared by every utility.
///
/// Every field is optional in the TOML file; omitted fields keep their default. Entries in
/// `function_names` and `table_names` are merged over the defaults rather than replacing them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub region: String,
    pub gateway_id: String,
    pub stage: String,
    pub account_id: String,
    pub function_names: BTreeMap<String, String>,
    pub table_names: BTreeMap<String, String>,
    pub marker_path: String,
    pub deploy_settle_secs: u64,
    pub invoke_settle_secs: u64,
    pub probe_timeout_secs: u64,
}

fn default_function_names() -> BTreeMap<String, String> {
    [
        ("evaluation", "EmployeeEvaluation"),
        ("employees_list", "EmployeesList"),
        ("projects_list", "ProjectsList"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_table_names() -> BTreeMap<String, String> {
    [("employees", "Employees"), ("projects", "Projects")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            gateway_id: DEFAULT_GATEWAY_ID.to_string(),
            stage: DEFAULT_STAGE.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            function_names: default_function_names(),
            table_names: default_table_names(),
            marker_path: "/domain-analysis".to_string(),
            deploy_settle_secs: 10,
            invoke_settle_secs: 2,
            probe_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents).context("Failed to parse config")?;

        for (role, name) in default_function_names() {
            config.function_names.entry(role).or_insert(name);
        }
        for (entity, name) in default_table_names() {
            config.table_names.entry(entity).or_insert(name);
        }

        Ok(config)
    }

    /// Loads the config file at `path`, or the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml(&contents)
                    .with_context(|| format!("Invalid config file: {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn function_name(&self, role: &str) -> Result<&str> {
        self.function_names
            .get(role)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("No function configured for '{}'", role))
    }

    pub fn table_name(&self, entity: &str) -> Result<&str> {
        self.table_names
            .get(entity)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("No table configured for '{}'", entity))
    }

    pub fn endpoint_base_url(&self) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}",
            self.gateway_id, self.region, self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!("us-east-2", config.region);
        assert_eq!("ifeniowvpb", config.gateway_id);
        assert_eq!("EmployeeEvaluation", config.function_name("evaluation").unwrap());
        assert_eq!("Employees", config.table_name("employees").unwrap());
        assert_eq!(
            "https://ifeniowvpb.execute-api.us-east-2.amazonaws.com/prod",
            config.endpoint_base_url()
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            gateway_id = "abc123"

            [function_names]
            evaluation = "EmployeeEvaluation-staging"
            resume_parser = "ResumeParser"
            "#,
        )
        .unwrap();

        assert_eq!("abc123", config.gateway_id);
        assert_eq!("us-east-2", config.region);
        assert_eq!(
            "EmployeeEvaluation-staging",
            config.function_name("evaluation").unwrap()
        );
        assert_eq!("ResumeParser", config.function_name("resume_parser").unwrap());
        assert_eq!("EmployeesList", config.function_name("employees_list").unwrap());
        assert_eq!("Projects", config.table_name("projects").unwrap());
    }

    #[test]
    fn test_unknown_role() {
        let config = Config::default();
        assert!(config.function_name("nope").is_err());
        assert!(config.table_name("nope").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hr-ops.toml");
        fs::write(&path, "region = \"eu-west-1\"\ndeploy_settle_secs = 0\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!("eu-west-1", config.region);
        assert_eq!(0, config.deploy_settle_secs);

        assert_eq!(Config::default(), Config::load(None).unwrap());
        assert!(Config::load(Some(dir.path().join("missing.toml").as_path())).is_err());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml("region = [").is_err());
    }
}
