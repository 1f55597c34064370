use crate::error::{ErrorCode, ScopesError};
use crate::value::{to_variant_map, VariantMap};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CannedQuery {
    pub scope_id: String,
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub department_id: String,
    #[serde(default)]
    pub filter_state: VariantMap,
}

impl CannedQuery {
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            ..Self::default()
        }
    }

    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = department_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_form_factor")]
    pub form_factor: String,
    /// Maximum number of results the caller accepts; zero means unlimited.
    #[serde(default)]
    pub cardinality: u32,
    #[serde(default)]
    pub hints: VariantMap,
}

impl Default for SearchMetadata {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            form_factor: default_form_factor(),
            cardinality: 0,
            hints: VariantMap::new(),
        }
    }
}

impl SearchMetadata {
    pub fn with_cardinality(mut self, cardinality: u32) -> Self {
        self.cardinality = cardinality;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_form_factor")]
    pub form_factor: String,
    #[serde(default)]
    pub scope_data: serde_json::Value,
    #[serde(default)]
    pub hints: VariantMap,
}

impl Default for ActionMetadata {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            form_factor: default_form_factor(),
            scope_data: serde_json::Value::Null,
            hints: VariantMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeResult {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub art: String,
    #[serde(default)]
    pub dnd_uri: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub intercept_activation: bool,
    #[serde(default)]
    pub attributes: VariantMap,
}

impl ScopeResult {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn serialize(&self) -> Result<VariantMap, ScopesError> {
        to_variant_map(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    NotHandled,
    ShowDash,
    HideDash,
    ShowPreview,
    PerformQuery,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivationResponse {
    status: ActivationStatus,
    #[serde(default)]
    query: Option<CannedQuery>,
    #[serde(default)]
    hints: VariantMap,
}

impl ActivationResponse {
    pub fn new(status: ActivationStatus) -> Result<Self, ScopesError> {
        if status == ActivationStatus::PerformQuery {
            return Err(ScopesError::new(
                ErrorCode::InvalidArgument,
                "perform_query activation requires a canned query",
            ));
        }
        Ok(Self {
            status,
            query: None,
            hints: VariantMap::new(),
        })
    }

    pub fn not_handled() -> Self {
        Self {
            status: ActivationStatus::NotHandled,
            query: None,
            hints: VariantMap::new(),
        }
    }

    pub fn for_query(query: CannedQuery) -> Self {
        Self {
            status: ActivationStatus::PerformQuery,
            query: Some(query),
            hints: VariantMap::new(),
        }
    }

    pub fn status(&self) -> ActivationStatus {
        self.status
    }

    pub fn query(&self) -> Option<&CannedQuery> {
        self.query.as_ref()
    }

    pub fn hints(&self) -> &VariantMap {
        &self.hints
    }

    pub fn set_hints(&mut self, hints: VariantMap) {
        self.hints = hints;
    }

    pub fn serialize(&self) -> Result<VariantMap, ScopesError> {
        to_variant_map(self)
    }
}

fn default_locale() -> String {
    "en_US".to_string()
}

fn default_form_factor() -> String {
    "desktop".to_string()
}
