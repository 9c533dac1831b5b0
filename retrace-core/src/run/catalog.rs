use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::models::{BrowserEngine, SelectorMetadata};
use crate::sqlite::to_utc;

/// Locator candidates captured while recording an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectorSet {
    pub id: Option<String>,
    pub test_id: Option<String>,
    pub aria_label: Option<String>,
    pub name: Option<String>,
    pub css: Option<String>,
    pub xpath: Option<String>,
    pub text: Option<String>,
}

impl SelectorSet {
    /// First non-empty locator in precedence order: id, test-id,
    /// aria-label, name, css, xpath, text.
    pub fn primary(&self) -> Option<SelectorMetadata> {
        let candidates = [
            ("id", &self.id),
            ("test_id", &self.test_id),
            ("aria_label", &self.aria_label),
            ("name", &self.name),
            ("css", &self.css),
            ("xpath", &self.xpath),
            ("text", &self.text),
        ];
        candidates.into_iter().find_map(|(kind, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| SelectorMetadata {
                    kind: kind.to_string(),
                    value: value.to_string(),
                })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub selectors: SelectorSet,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RecordedAction {
    pub fn new(id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            selectors: SelectorSet::default(),
            value: None,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub recording_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub name: String,
    pub url: String,
    pub actions: Vec<RecordedAction>,
    #[serde(default)]
    pub action_count: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Recording {
    pub fn new(
        recording_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            recording_id: recording_id.into(),
            user_id: user_id.into(),
            project_id: None,
            name: name.into(),
            url: url.into(),
            actions: Vec::new(),
            action_count: 0,
            created_at: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<RecordedAction>) -> Self {
        self.action_count = actions.len() as i64;
        self.actions = actions;
        self
    }

    pub fn total_actions(&self) -> i64 {
        self.actions.len() as i64
    }

    pub fn action_summary(&self) -> Vec<ActionSummary> {
        self.actions
            .iter()
            .map(|action| ActionSummary {
                id: action.id.clone(),
                action_type: action.action_type.clone(),
            })
            .collect()
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let actions: String = row.get("actions")?;
        let actions: Vec<RecordedAction> = serde_json::from_str(&actions).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        Ok(Self {
            recording_id: row.get("recording_id")?,
            user_id: row.get("user_id")?,
            project_id: row.get("project_id")?,
            name: row.get("name")?,
            url: row.get("url")?,
            actions,
            action_count: row.get("action_count")?,
            created_at: to_utc(created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestDefinition {
    pub test_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub recording_id: String,
    pub name: String,
    pub browsers: Vec<BrowserEngine>,
    pub parallel: bool,
    pub headless: bool,
    pub timeout_ms: Option<u64>,
    pub record_video: bool,
    pub capture_screenshots: bool,
}

impl TestDefinition {
    pub fn new(
        test_id: impl Into<String>,
        user_id: impl Into<String>,
        recording_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            user_id: user_id.into(),
            project_id: None,
            recording_id: recording_id.into(),
            name: name.into(),
            browsers: vec![BrowserEngine::Chromium],
            parallel: true,
            headless: true,
            timeout_ms: None,
            record_video: false,
            capture_screenshots: true,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let browsers: String = row.get("browsers")?;
        Ok(Self {
            test_id: row.get("test_id")?,
            user_id: row.get("user_id")?,
            project_id: row.get("project_id")?,
            recording_id: row.get("recording_id")?,
            name: row.get("name")?,
            browsers: BrowserEngine::parse_list(&browsers).unwrap_or_default(),
            parallel: row.get::<_, i64>("parallel")? != 0,
            headless: row.get::<_, i64>("headless")? != 0,
            timeout_ms: row
                .get::<_, Option<i64>>("timeout_ms")?
                .map(|value| value.max(0) as u64),
            record_video: row.get::<_, i64>("record_video")? != 0,
            capture_screenshots: row.get::<_, i64>("capture_screenshots")? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_precedence_prefers_id_then_test_id() {
        let mut selectors = SelectorSet {
            css: Some(".btn".into()),
            text: Some("Submit".into()),
            test_id: Some("submit-button".into()),
            ..SelectorSet::default()
        };
        let primary = selectors.primary().unwrap();
        assert_eq!(primary.kind, "test_id");
        assert_eq!(primary.value, "submit-button");

        selectors.id = Some("submit".into());
        assert_eq!(selectors.primary().unwrap().kind, "id");
    }

    #[test]
    fn selector_precedence_skips_blank_values() {
        let selectors = SelectorSet {
            id: Some("  ".into()),
            name: Some("".into()),
            xpath: Some("//button[1]".into()),
            text: Some("Go".into()),
            ..SelectorSet::default()
        };
        let primary = selectors.primary().unwrap();
        assert_eq!(primary.kind, "xpath");
        assert!(SelectorSet::default().primary().is_none());
    }

    #[test]
    fn recorded_actions_use_type_field_on_the_wire() {
        let json = r##"[{"id":"act_001","type":"click","selectors":{"css":"#go"}},
                       {"id":"act_002","type":"type","value":"hello"}]"##;
        let actions: Vec<RecordedAction> = serde_json::from_str(json).unwrap();
        assert_eq!(actions[0].action_type, "click");
        assert_eq!(actions[1].value.as_deref(), Some("hello"));
        assert!(actions[1].selectors.primary().is_none());
    }
}
