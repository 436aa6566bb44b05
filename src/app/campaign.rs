use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app::command_tree::CommandTree;
use crate::app::error::AppError;
use crate::app::placeholders::substitute_braced;

#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub defaults: Map<String, Value>,
    pub commands: CommandTree,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CampaignFile {
    Tree(CommandTree),
    Full {
        #[serde(default)]
        defaults: Map<String, Value>,
        commands: CommandTree,
    },
}

pub fn load_campaign(path: &Path, trace_id: &str) -> Result<Campaign, AppError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::validation(
            format!("Failed to read campaign script {}: {err}", path.display()),
            trace_id,
        )
    })?;
    parse_campaign(&raw, trace_id)
}

pub fn parse_campaign(raw: &str, trace_id: &str) -> Result<Campaign, AppError> {
    let parsed: CampaignFile = serde_json::from_str(raw).map_err(|err| {
        AppError::validation(format!("Malformed campaign script: {err}"), trace_id)
    })?;
    Ok(match parsed {
        CampaignFile::Tree(commands) => Campaign {
            defaults: Map::new(),
            commands,
        },
        CampaignFile::Full { defaults, commands } => Campaign { defaults, commands },
    })
}

impl Campaign {
    /// Substitutes `{key}` tokens; `overrides` win over the script's defaults.
    pub fn expand(&self, overrides: &Map<String, Value>) -> CommandTree {
        let mut vars = self.defaults.clone();
        for (key, value) in overrides {
            vars.insert(key.clone(), value.clone());
        }
        self.commands
            .clone()
            .map_commands(&|line| substitute_braced(line, &vars))
    }
}

/// Parses repeated `key=value` arguments into keyword arguments.
pub fn parse_key_values(pairs: &[String], trace_id: &str) -> Result<Map<String, Value>, AppError> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(AppError::validation(
                format!("expected key=value, got '{pair}'"),
                trace_id,
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::validation(
                format!("empty key in '{pair}'"),
                trace_id,
            ));
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(map)
}
