//! Shell export of the active fork.
//!
//! Two formats are produced from the enabled stages of the active fork:
//! a multi-line bash pipe script and a single-line `recs chain` command.

use std::sync::LazyLock;

use regex::Regex;

use super::selectors::get_enabled_stages;
use super::types::{InputSource, InputSourceKind, PipelineState, Stage};

const SHEBANG: &str = "#!/usr/bin/env bash";

/// Any character outside this set forces quoting.
#[allow(clippy::expect_used)]
static SHELL_SPECIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9_\-.,/:=@+%^~]").expect("shell special pattern is valid")
});

/// Quotes an argument for a POSIX-ish shell.
///
/// Plain arguments pass through, anything else is single-quoted, and
/// arguments that themselves contain `'` use `$'...'` quoting.
#[must_use]
pub fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !SHELL_SPECIAL.is_match(arg) {
        return arg.to_string();
    }
    if !arg.contains('\'') {
        return format!("'{arg}'");
    }
    format!("$'{}'", arg.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Renders the active fork as a bash script of piped `recs` commands.
///
/// When `input` is `None` the active input is used. A file input's path is
/// appended to the first command.
#[must_use]
pub fn export_as_pipe_script(state: &PipelineState, input: Option<&InputSource>) -> String {
    let stages = get_enabled_stages(state);
    if stages.is_empty() {
        return format!("{SHEBANG}\n");
    }

    let mut lines: Vec<String> = stages
        .iter()
        .map(|stage| format!("recs {}", stage_words(stage)))
        .collect();

    if let Some(InputSourceKind::File { path }) =
        input.or_else(|| state.active_input()).map(|i| &i.source)
    {
        lines[0].push(' ');
        lines[0].push_str(&shell_escape(&path.to_string_lossy()));
    }

    format!("{SHEBANG}\n{}\n", lines.join(" \\\n  | "))
}

/// Renders the active fork as one `recs chain` command line.
#[must_use]
pub fn export_as_chain_command(state: &PipelineState) -> String {
    let stages = get_enabled_stages(state);
    if stages.is_empty() {
        return "recs chain".to_string();
    }
    let parts: Vec<String> = stages.iter().map(|stage| stage_words(stage)).collect();
    format!("recs chain {}", parts.join(" \\| "))
}

fn stage_words(stage: &Stage) -> String {
    std::iter::once(stage.config.operation_name.clone())
        .chain(stage.config.args.iter().map(|arg| shell_escape(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}
