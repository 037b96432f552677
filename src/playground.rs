//! Interactive query explorer page.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Configuration options pertaining to the explorer page.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct Playground {
    /// Set to false to never serve the explorer page
    pub enabled: bool,

    /// Pinned version of the explorer assets
    pub version: String,

    /// Explorer UI settings, forwarded to the page verbatim
    pub settings: serde_json::Map<String, Value>,
}

impl Default for Playground {
    fn default() -> Self {
        Self {
            enabled: default_playground_enabled(),
            version: default_playground_version(),
            settings: serde_json::Map::new(),
        }
    }
}

fn default_playground_enabled() -> bool {
    true
}

fn default_playground_version() -> String {
    "1.7.42".to_string()
}

/// Render the explorer page for the given endpoints. Synchronous: the page
/// is a static template with the render options substituted in.
pub(crate) fn page_content(
    playground: &Playground,
    endpoint: &str,
    subscription_endpoint: Option<&str>,
) -> Vec<u8> {
    const TEMPLATE: &str = include_str!("../templates/playground_index.html");

    let mut options = serde_json::Map::new();
    options.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
    if let Some(subscription_endpoint) = subscription_endpoint {
        options.insert(
            "subscriptionEndpoint".to_string(),
            Value::String(subscription_endpoint.to_string()),
        );
    }
    if !playground.settings.is_empty() {
        options.insert(
            "settings".to_string(),
            Value::Object(playground.settings.clone()),
        );
    }

    TEMPLATE
        .replace("{{PLAYGROUND_VERSION}}", &playground.version)
        .replace("{{RENDER_OPTIONS}}", &Value::Object(options).to_string())
        .into_bytes()
}
