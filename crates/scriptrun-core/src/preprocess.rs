//! Conditional compilation for text-format wasm sources.
//!
//! Directives live in line comments so unprocessed sources stay valid:
//!
//! ```text
//! ;;#if HOST_2024
//!   (call $new_api)
//! ;;#else
//!   (call $old_api)
//! ;;#endif
//! ```
//!
//! `;;#if !SYM` negates. Directive lines and disabled lines are blanked, never
//! removed, so compiler line numbers still match the source file.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("line {0}: `;;#if` without a symbol")]
    MissingSymbol(usize),

    #[error("line {0}: `;;#else` without a matching `;;#if`")]
    StrayElse(usize),

    #[error("line {0}: duplicate `;;#else`")]
    DuplicateElse(usize),

    #[error("line {0}: `;;#endif` without a matching `;;#if`")]
    StrayEndif(usize),

    #[error("line {0}: `;;#if` is never closed")]
    Unterminated(usize),
}

struct Frame {
    opened_at: usize,
    parent_active: bool,
    condition: bool,
    in_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

enum Directive<'a> {
    If(&'a str),
    Else,
    Endif,
}

fn directive(line: &str) -> Option<Directive<'_>> {
    let rest = line.trim_start().strip_prefix(";;#")?;
    let mut words = rest.split_whitespace();
    match words.next()? {
        "if" => Some(Directive::If(words.next().unwrap_or(""))),
        "else" => Some(Directive::Else),
        "endif" => Some(Directive::Endif),
        _ => None,
    }
}

/// Expand `source` against the defined symbols.
pub fn preprocess(source: &str, defines: &[String]) -> Result<String, PreprocessError> {
    let defined: HashSet<&str> = defines.iter().map(String::as_str).collect();
    let mut stack: Vec<Frame> = Vec::new();
    let mut out: Vec<&str> = Vec::new();

    for (idx, line) in source.split('\n').enumerate() {
        let line_no = idx + 1;
        let active = stack.last().is_none_or(Frame::active);
        match directive(line) {
            Some(Directive::If(symbol)) => {
                let (negated, name) = match symbol.strip_prefix('!') {
                    Some(name) => (true, name),
                    None => (false, symbol),
                };
                if name.is_empty() {
                    return Err(PreprocessError::MissingSymbol(line_no));
                }
                stack.push(Frame {
                    opened_at: line_no,
                    parent_active: active,
                    condition: defined.contains(name) != negated,
                    in_else: false,
                });
                out.push("");
            }
            Some(Directive::Else) => {
                let frame = stack.last_mut().ok_or(PreprocessError::StrayElse(line_no))?;
                if frame.in_else {
                    return Err(PreprocessError::DuplicateElse(line_no));
                }
                frame.in_else = true;
                out.push("");
            }
            Some(Directive::Endif) => {
                stack.pop().ok_or(PreprocessError::StrayEndif(line_no))?;
                out.push("");
            }
            None if active => out.push(line),
            None => out.push(""),
        }
    }

    if let Some(open) = stack.last() {
        return Err(PreprocessError::Unterminated(open.opened_at));
    }
    Ok(out.join("\n"))
}
