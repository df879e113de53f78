// src/pipeline/global_functions.rs
use crate::record::Level;
use starlark::starlark_module;
use starlark::values::none::NoneType;
use std::cell::Cell;

thread_local! {
    pub(crate) static SKIP_FLAG: Cell<bool> = const { Cell::new(false) };
    pub(crate) static HIGHLIGHT_FLAG: Cell<Option<bool>> = const { Cell::new(None) };
}

pub(crate) fn reset_flags() {
    SKIP_FLAG.with(|flag| flag.set(false));
    HIGHLIGHT_FLAG.with(|flag| flag.set(None));
}

/// Builtins available to filter programs.
#[starlark_module]
pub fn filter_functions(builder: &mut starlark::environment::GlobalsBuilder) {
    /// Drop the current line.
    fn skip() -> anyhow::Result<NoneType> {
        SKIP_FLAG.with(|flag| flag.set(true));
        Ok(NoneType)
    }

    /// Mark the current line as highlighted (or not, with `highlight(False)`).
    fn highlight(on: Option<bool>) -> anyhow::Result<NoneType> {
        HIGHLIGHT_FLAG.with(|flag| flag.set(Some(on.unwrap_or(true))));
        Ok(NoneType)
    }

    fn level_name(level: i32) -> anyhow::Result<String> {
        usize::try_from(level)
            .ok()
            .and_then(|i| Level::ALL.get(i))
            .map(|l| l.name().to_string())
            .ok_or_else(|| anyhow::anyhow!("no level with code {}", level))
    }

    fn regex_match(pattern: String, text: String) -> anyhow::Result<bool> {
        let regex = regex::Regex::new(&pattern)?;
        Ok(regex.is_match(&text))
    }

    fn regex_replace(pattern: String, replacement: String, text: String) -> anyhow::Result<String> {
        let regex = regex::Regex::new(&pattern)?;
        Ok(regex.replace_all(&text, replacement.as_str()).into_owned())
    }
}
