//! Task types and their parameter structs.
//!
//! Persisted rows keep the type as a string and the parameters as JSON;
//! [`TaskParams::from_parts`] turns that pair into the typed union and
//! [`TaskParams::to_parts`] goes the other way.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TaskParameters, TaskParamsError};

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// A named parameter, either workflow-global or task-local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    pub prop: String,
    #[serde(default)]
    pub value: String,
}

impl Property {
    pub fn new(prop: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// Discriminant of [`TaskParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Shell,
    Python,
    Sql,
    Http,
    SubWorkflow,
    Conditions,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell       => write!(f, "SHELL"),
            Self::Python      => write!(f, "PYTHON"),
            Self::Sql         => write!(f, "SQL"),
            Self::Http        => write!(f, "HTTP"),
            Self::SubWorkflow => write!(f, "SUB_WORKFLOW"),
            Self::Conditions  => write!(f, "CONDITIONS"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = TaskParamsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHELL"        => Ok(Self::Shell),
            "PYTHON"       => Ok(Self::Python),
            "SQL"          => Ok(Self::Sql),
            "HTTP"         => Ok(Self::Http),
            "SUB_WORKFLOW" => Ok(Self::SubWorkflow),
            "CONDITIONS"   => Ok(Self::Conditions),
            other          => Err(TaskParamsError::UnknownTaskType(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellParams {
    pub raw_script: String,
    #[serde(default)]
    pub local_params: Vec<Property>,
}

impl TaskParameters for ShellParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.raw_script.trim().is_empty() {
            return Err(TaskParamsError::MissingField {
                task_type: "SHELL",
                field: "rawScript",
            });
        }
        Ok(())
    }

    fn local_params(&self) -> &[Property] {
        &self.local_params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonParams {
    pub raw_script: String,
    #[serde(default)]
    pub local_params: Vec<Property>,
}

impl TaskParameters for PythonParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.raw_script.trim().is_empty() {
            return Err(TaskParamsError::MissingField {
                task_type: "PYTHON",
                field: "rawScript",
            });
        }
        Ok(())
    }

    fn local_params(&self) -> &[Property] {
        &self.local_params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlParams {
    /// Id of the datasource the statement runs against.
    pub datasource: i64,
    pub sql: String,
    #[serde(default)]
    pub local_params: Vec<Property>,
}

impl TaskParameters for SqlParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.sql.trim().is_empty() {
            return Err(TaskParamsError::MissingField {
                task_type: "SQL",
                field: "sql",
            });
        }
        if self.datasource <= 0 {
            return Err(TaskParamsError::InvalidField {
                task_type: "SQL",
                field: "datasource",
                message: format!("expected a positive id, got {}", self.datasource),
            });
        }
        Ok(())
    }

    fn local_params(&self) -> &[Property] {
        &self.local_params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpParams {
    pub url: String,
    pub http_method: HttpMethod,
    #[serde(default)]
    pub http_params: Vec<Property>,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_http_timeout")]
    pub connect_timeout: u32,
}

fn default_http_timeout() -> u32 {
    60_000
}

impl TaskParameters for HttpParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.url.trim().is_empty() {
            return Err(TaskParamsError::MissingField {
                task_type: "HTTP",
                field: "url",
            });
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(TaskParamsError::InvalidField {
                task_type: "HTTP",
                field: "url",
                message: format!("'{}' is not an http(s) url", self.url),
            });
        }
        Ok(())
    }

    fn local_params(&self) -> &[Property] {
        &self.http_params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWorkflowParams {
    pub workflow_definition_code: i64,
}

impl TaskParameters for SubWorkflowParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.workflow_definition_code <= 0 {
            return Err(TaskParamsError::InvalidField {
                task_type: "SUB_WORKFLOW",
                field: "workflowDefinitionCode",
                message: format!("expected a positive code, got {}", self.workflow_definition_code),
            });
        }
        Ok(())
    }
}

/// Branching task: picks `success_node` or `failed_node` depending on the
/// outcome of its upstream tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsParams {
    #[serde(default)]
    pub success_node: Vec<i64>,
    #[serde(default)]
    pub failed_node: Vec<i64>,
}

impl TaskParameters for ConditionsParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        if self.success_node.is_empty() && self.failed_node.is_empty() {
            return Err(TaskParamsError::MissingField {
                task_type: "CONDITIONS",
                field: "successNode",
            });
        }
        if let Some(code) = self
            .success_node
            .iter()
            .chain(&self.failed_node)
            .find(|&&code| code <= 0)
        {
            return Err(TaskParamsError::InvalidField {
                task_type: "CONDITIONS",
                field: "successNode",
                message: format!("branch task code {code} is not a valid code"),
            });
        }
        Ok(())
    }

    fn referenced_task_codes(&self) -> Vec<i64> {
        self.success_node
            .iter()
            .chain(&self.failed_node)
            .copied()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TaskParams
// ---------------------------------------------------------------------------

/// The typed payload of a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "taskType", content = "taskParams", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskParams {
    Shell(ShellParams),
    Python(PythonParams),
    Sql(SqlParams),
    Http(HttpParams),
    SubWorkflow(SubWorkflowParams),
    Conditions(ConditionsParams),
}

impl TaskParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Shell(_)       => TaskType::Shell,
            Self::Python(_)      => TaskType::Python,
            Self::Sql(_)         => TaskType::Sql,
            Self::Http(_)        => TaskType::Http,
            Self::SubWorkflow(_) => TaskType::SubWorkflow,
            Self::Conditions(_)  => TaskType::Conditions,
        }
    }

    /// Decode a persisted `(task_type, task_params)` pair and validate it.
    pub fn from_parts(task_type: &str, params: Value) -> Result<Self, TaskParamsError> {
        let kind: TaskType = task_type.parse()?;
        let malformed = |e: serde_json::Error| TaskParamsError::Malformed {
            task_type: kind.to_string(),
            message: e.to_string(),
        };

        let decoded = match kind {
            TaskType::Shell       => Self::Shell(serde_json::from_value(params).map_err(malformed)?),
            TaskType::Python      => Self::Python(serde_json::from_value(params).map_err(malformed)?),
            TaskType::Sql         => Self::Sql(serde_json::from_value(params).map_err(malformed)?),
            TaskType::Http        => Self::Http(serde_json::from_value(params).map_err(malformed)?),
            TaskType::SubWorkflow => Self::SubWorkflow(serde_json::from_value(params).map_err(malformed)?),
            TaskType::Conditions  => Self::Conditions(serde_json::from_value(params).map_err(malformed)?),
        };

        decoded.validate()?;
        Ok(decoded)
    }

    /// Split into the `(task_type, task_params)` pair stored in a row.
    pub fn to_parts(&self) -> Result<(String, Value), TaskParamsError> {
        let params = match self {
            Self::Shell(p)       => serde_json::to_value(p),
            Self::Python(p)      => serde_json::to_value(p),
            Self::Sql(p)         => serde_json::to_value(p),
            Self::Http(p)        => serde_json::to_value(p),
            Self::SubWorkflow(p) => serde_json::to_value(p),
            Self::Conditions(p)  => serde_json::to_value(p),
        }
        .map_err(|e| TaskParamsError::Malformed {
            task_type: self.task_type().to_string(),
            message: e.to_string(),
        })?;

        Ok((self.task_type().to_string(), params))
    }

    fn inner(&self) -> &dyn TaskParameters {
        match self {
            Self::Shell(p)       => p,
            Self::Python(p)      => p,
            Self::Sql(p)         => p,
            Self::Http(p)        => p,
            Self::SubWorkflow(p) => p,
            Self::Conditions(p)  => p,
        }
    }
}

impl TaskParameters for TaskParams {
    fn validate(&self) -> Result<(), TaskParamsError> {
        self.inner().validate()
    }

    fn local_params(&self) -> &[Property] {
        self.inner().local_params()
    }

    fn referenced_task_codes(&self) -> Vec<i64> {
        self.inner().referenced_task_codes()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shell_params_decode_from_parts() {
        let params = TaskParams::from_parts("SHELL", json!({ "rawScript": "echo hi" }))
            .expect("valid shell payload");
        assert_eq!(params.task_type(), TaskType::Shell);
        assert!(params.local_params().is_empty());
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let err = TaskParams::from_parts("SPARK", json!({})).unwrap_err();
        assert_eq!(err, TaskParamsError::UnknownTaskType("SPARK".into()));
    }

    #[test]
    fn blank_script_fails_validation() {
        let err = TaskParams::from_parts("SHELL", json!({ "rawScript": "   " })).unwrap_err();
        assert!(matches!(err, TaskParamsError::MissingField { field: "rawScript", .. }));
    }

    #[test]
    fn malformed_json_names_the_task_type() {
        let err = TaskParams::from_parts("SQL", json!({ "sql": 42 })).unwrap_err();
        assert!(matches!(err, TaskParamsError::Malformed { task_type, .. } if task_type == "SQL"));
    }

    #[test]
    fn http_url_must_have_scheme() {
        let err = TaskParams::from_parts(
            "HTTP",
            json!({ "url": "example.com", "httpMethod": "GET" }),
        )
        .unwrap_err();
        assert!(matches!(err, TaskParamsError::InvalidField { field: "url", .. }));
    }

    #[test]
    fn conditions_expose_branch_codes() {
        let params = TaskParams::from_parts(
            "CONDITIONS",
            json!({ "successNode": [11], "failedNode": [12, 13] }),
        )
        .expect("valid conditions payload");
        assert_eq!(params.referenced_task_codes(), vec![11, 12, 13]);
    }

    #[test]
    fn tagged_serialisation_carries_type_and_params() {
        let params = TaskParams::Sql(SqlParams {
            datasource: 3,
            sql: "select 1".into(),
            local_params: vec![Property::new("dt", "${system.biz.date}")],
        });
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["taskType"], "SQL");
        assert_eq!(value["taskParams"]["datasource"], 3);

        let (kind, raw) = params.to_parts().unwrap();
        assert_eq!(TaskParams::from_parts(&kind, raw).unwrap(), params);
    }
}
