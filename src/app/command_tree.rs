use serde::{Deserialize, Serialize};

use crate::app::error::AppError;

/// A console command or an arbitrarily nested list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandTree {
    Single(String),
    List(Vec<CommandTree>),
}

impl CommandTree {
    pub fn is_empty(&self) -> bool {
        match self {
            CommandTree::Single(line) => line.trim().is_empty(),
            CommandTree::List(items) => items.is_empty(),
        }
    }

    /// Number of scalar commands anywhere in the tree.
    pub fn command_count(&self) -> usize {
        match self {
            CommandTree::Single(_) => 1,
            CommandTree::List(items) => items.iter().map(CommandTree::command_count).sum(),
        }
    }

    pub fn map_commands(self, f: &impl Fn(&str) -> String) -> CommandTree {
        match self {
            CommandTree::Single(line) => CommandTree::Single(f(&line)),
            CommandTree::List(items) => {
                CommandTree::List(items.into_iter().map(|item| item.map_commands(f)).collect())
            }
        }
    }
}

impl From<&str> for CommandTree {
    fn from(line: &str) -> Self {
        CommandTree::Single(line.to_string())
    }
}

impl From<String> for CommandTree {
    fn from(line: String) -> Self {
        CommandTree::Single(line)
    }
}

impl From<Vec<CommandTree>> for CommandTree {
    fn from(items: Vec<CommandTree>) -> Self {
        CommandTree::List(items)
    }
}

/// Which list depth fans its elements out to parallel branches. The top-level
/// call runs at depth 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecPolicy {
    pub parallel_depth: Option<usize>,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            parallel_depth: Some(1),
        }
    }
}

impl ExecPolicy {
    pub fn sequential() -> Self {
        Self {
            parallel_depth: None,
        }
    }

    pub fn from_depth(depth: usize) -> Self {
        Self {
            parallel_depth: (depth > 0).then_some(depth),
        }
    }

    pub fn runs_parallel(&self, depth: usize) -> bool {
        self.parallel_depth == Some(depth)
    }
}

/// Splits a console line into arguments. Quotes group words, backslash escapes
/// the next character outside single quotes.
pub fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => current.push(ch),
            (Some('"'), '"') => quote = None,
            (Some('"'), '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            (Some(_), _) => current.push(ch),
            (None, '\'' | '"') => {
                quote = Some(ch);
                in_token = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, _) => {
                current.push(ch);
                in_token = true;
            }
        }
    }

    if let Some(open) = quote {
        return Err(AppError::validation(
            format!("unterminated {open} quote in command line"),
            "",
        ));
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_nested_json_lists() {
        let tree: CommandTree =
            serde_json::from_str(r#"["device --list", ["fetch --path=/b", "sleep 1"], []]"#)
                .expect("tree");
        assert_eq!(tree.command_count(), 3);
        let CommandTree::List(items) = &tree else {
            panic!("expected list");
        };
        assert_eq!(items[0], CommandTree::from("device --list"));
        assert!(items[2].is_empty());
    }

    #[test]
    fn maps_every_scalar() {
        let tree = CommandTree::from(vec![
            CommandTree::from("a"),
            CommandTree::from(vec![CommandTree::from("b")]),
        ]);
        let mapped = tree.map_commands(&|line| line.to_uppercase());
        assert_eq!(
            mapped,
            CommandTree::from(vec![
                CommandTree::from("A"),
                CommandTree::from(vec![CommandTree::from("B")]),
            ])
        );
    }

    #[test]
    fn policy_depths() {
        assert!(ExecPolicy::default().runs_parallel(1));
        assert!(!ExecPolicy::default().runs_parallel(2));
        assert!(!ExecPolicy::sequential().runs_parallel(1));
        assert_eq!(ExecPolicy::from_depth(0), ExecPolicy::sequential());
    }

    #[test]
    fn splits_quoted_arguments() {
        let args = split_command_line(r#"adb -s  HT7A1 shell "echo hi there" 'a b' c\ d"#)
            .expect("split");
        assert_eq!(
            args,
            vec!["adb", "-s", "HT7A1", "shell", "echo hi there", "a b", "c d"]
        );
        assert_eq!(split_command_line(r#"x "" y"#).expect("split"), vec!["x", "", "y"]);
        assert!(split_command_line("   ").expect("split").is_empty());
    }

    #[test]
    fn rejects_unterminated_quotes() {
        let err = split_command_line("echo \"oops").expect_err("expected error");
        assert_eq!(err.code, "ERR_VALIDATION");
    }
}
