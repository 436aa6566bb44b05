//! Text substitution used by the console and by hook commands.
//!
//! Three flavours live here:
//! - `format_string`: `{processor.arg}` lookups into the console argument buffers.
//! - `substitute_braced`: `{key}` lookups into campaign/lease keyword arguments.
//! - `Placeholders::expand_vars`: repo-upload hook `${VAR}` expansion, which may
//!   splice one argument into many.
//!
//! Unknown names are always left as-is.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::app::error::AppError;

pub type ArgBuffers = HashMap<String, HashMap<String, String>>;

pub const FILES_PREFIXED_TOKEN: &str = "${PREUPLOAD_FILES_PREFIXED}";

fn dotted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_-]*)\}")
            .expect("valid dotted placeholder regex")
    })
}

fn braced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid braced placeholder regex")
    })
}

pub fn format_string(text: &str, buffers: &ArgBuffers) -> String {
    dotted_re()
        .replace_all(text, |caps: &Captures| {
            buffers
                .get(&caps[1])
                .and_then(|args| args.get(&caps[2]))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn substitute_braced(text: &str, vars: &Map<String, Value>) -> String {
    braced_re()
        .replace_all(text, |caps: &Captures| {
            vars.get(&caps[1])
                .and_then(value_to_text)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Scalar JSON values render as text, arrays join with `,`; objects and null do not render.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Null | Value::Object(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub file: String,
    pub status: FileStatus,
}

impl DiffEntry {
    pub fn modified(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: FileStatus::Modified,
        }
    }
}

const VARS: &[&str] = &[
    "PREUPLOAD_COMMIT_MESSAGE",
    "PREUPLOAD_COMMIT",
    "PREUPLOAD_FILES",
    "REPO_ROOT",
    "BUILD_OS",
];

#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    pub diff: Vec<DiffEntry>,
    pub commit_message: String,
    pub commit: String,
    pub repo_root: String,
}

impl Placeholders {
    pub fn from_env(diff: Vec<DiffEntry>, repo_root: impl Into<String>) -> Self {
        Self {
            diff,
            commit_message: std::env::var("PREUPLOAD_COMMIT_MESSAGE").unwrap_or_default(),
            commit: std::env::var("PREUPLOAD_COMMIT").unwrap_or_default(),
            repo_root: repo_root.into(),
        }
    }

    pub fn get(&self, var: &str) -> Option<PlaceholderValue> {
        let value = match var {
            "PREUPLOAD_COMMIT_MESSAGE" => PlaceholderValue::Text(self.commit_message.clone()),
            "PREUPLOAD_COMMIT" => PlaceholderValue::Text(self.commit.clone()),
            "PREUPLOAD_FILES" => PlaceholderValue::List(self.files()),
            "REPO_ROOT" => PlaceholderValue::Text(self.repo_root.clone()),
            "BUILD_OS" => PlaceholderValue::Text(build_os_name().to_string()),
            _ => return None,
        };
        Some(value)
    }

    fn files(&self) -> Vec<String> {
        self.diff
            .iter()
            .filter(|entry| entry.status != FileStatus::Deleted)
            .map(|entry| entry.file.clone())
            .collect()
    }

    pub fn expand_vars(&self, args: &[String]) -> Result<Vec<String>, AppError> {
        let mut ret: Vec<String> = Vec::with_capacity(args.len());
        for arg in args {
            if let Some(prefix) = arg.strip_suffix(FILES_PREFIXED_TOKEN) {
                if prefix.is_empty() {
                    if ret.len() < 2 {
                        return Err(AppError::validation(
                            "PREUPLOAD_FILES_PREFIXED cannot be the 1st or 2nd argument",
                            "",
                        ));
                    }
                    let flag = ret.pop().unwrap_or_default();
                    for file in self.files() {
                        ret.push(flag.clone());
                        ret.push(file);
                    }
                } else {
                    ret.extend(self.files().into_iter().map(|file| format!("{prefix}{file}")));
                }
                continue;
            }

            let exact = VARS
                .iter()
                .find(|var| arg.len() == var.len() + 3 && arg == &format!("${{{var}}}"));
            if let Some(var) = exact {
                match self.get(var) {
                    Some(PlaceholderValue::Text(text)) => ret.push(text),
                    Some(PlaceholderValue::List(items)) => ret.extend(items),
                    None => ret.push(arg.clone()),
                }
                continue;
            }

            ret.push(self.replace_inline(arg));
        }
        Ok(ret)
    }

    fn replace_inline(&self, arg: &str) -> String {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(&format!(r"\$\{{({})\}}", VARS.join("|")))
                .expect("valid hook placeholder regex")
        });
        re.replace_all(arg, |caps: &Captures| match self.get(&caps[1]) {
            Some(PlaceholderValue::Text(text)) => text,
            Some(PlaceholderValue::List(items)) => items.join(" "),
            None => caps[0].to_string(),
        })
        .into_owned()
    }
}

pub fn build_os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn placeholders() -> Placeholders {
        Placeholders {
            diff: vec![
                DiffEntry::modified("a"),
                DiffEntry::modified("b"),
                DiffEntry {
                    file: "gone".to_string(),
                    status: FileStatus::Deleted,
                },
            ],
            commit_message: "Fix the thing".to_string(),
            commit: "abc123".to_string(),
            repo_root: "/src".to_string(),
        }
    }

    #[test]
    fn format_string_replaces_known_buffer_values() {
        let mut buffers = ArgBuffers::new();
        buffers.insert(
            "fetch".to_string(),
            HashMap::from([("path".to_string(), "/builds/1234".to_string())]),
        );
        assert_eq!(
            format_string("flash --dir={fetch.path} --id={fetch.build_id}", &buffers),
            "flash --dir=/builds/1234 --id={fetch.build_id}"
        );
        assert_eq!(format_string("{nothing} {a.b}", &buffers), "{nothing} {a.b}");
    }

    #[test]
    fn substitute_braced_renders_scalars_and_lists() {
        let vars = json!({"serial": ["A", "B"], "shards": 2, "branch": "main"});
        let vars = vars.as_object().expect("object");
        assert_eq!(
            substitute_braced("test --serial={serial} --shards={shards} {branch} {missing}", vars),
            "test --serial=A,B --shards=2 main {missing}"
        );
    }

    #[test]
    fn prefixed_files_expand_per_file() {
        let ret = placeholders()
            .expand_vars(&strings(&["--file=${PREUPLOAD_FILES_PREFIXED}"]))
            .expect("expand");
        assert_eq!(ret, strings(&["--file=a", "--file=b"]));
    }

    #[test]
    fn standalone_prefixed_files_reuse_previous_argument() {
        let ret = placeholders()
            .expand_vars(&strings(&["lint", "--file", "${PREUPLOAD_FILES_PREFIXED}"]))
            .expect("expand");
        assert_eq!(ret, strings(&["lint", "--file", "a", "--file", "b"]));
    }

    #[test]
    fn standalone_prefixed_files_rejected_early() {
        let err = placeholders()
            .expand_vars(&strings(&["${PREUPLOAD_FILES_PREFIXED}"]))
            .expect_err("expected rejection");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(placeholders()
            .expand_vars(&strings(&["--file", "${PREUPLOAD_FILES_PREFIXED}"]))
            .is_err());
    }

    #[test]
    fn exact_list_match_splices_arguments() {
        let ret = placeholders()
            .expand_vars(&strings(&["check", "${PREUPLOAD_FILES}", "${PREUPLOAD_COMMIT}"]))
            .expect("expand");
        assert_eq!(ret, strings(&["check", "a", "b", "abc123"]));
    }

    #[test]
    fn partial_matches_join_lists_with_spaces() {
        let ret = placeholders()
            .expand_vars(&strings(&[
                "--files=${PREUPLOAD_FILES}",
                "${REPO_ROOT}/tools/${BUILD_OS}",
            ]))
            .expect("expand");
        assert_eq!(ret[0], "--files=a b");
        assert_eq!(ret[1], format!("/src/tools/{}", build_os_name()));
    }

    #[test]
    fn unknown_variables_pass_through() {
        let ret = placeholders()
            .expand_vars(&strings(&["${NOPE}", "x${ALSO_NOPE}y"]))
            .expect("expand");
        assert_eq!(ret, strings(&["${NOPE}", "x${ALSO_NOPE}y"]));
    }
}
