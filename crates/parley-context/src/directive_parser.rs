//! Line-level classification of in-thread control directives.
//!
//! A line whose whitespace-delimited tokens include one starting with
//! [`DIRECTIVE_MARKER`] is a directive line and never reaches the transcript.
//! Each directive line maps to one [`Directive`] for thread folding, while
//! [`directives_in_line`] exposes every directive a line carries.

pub const DIRECTIVE_MARKER: char = '#';

const SET_INSTRUCTION_PREFIX: &str = "#system_message(";
const SHOW_INSTRUCTION_TOKEN: &str = "#show_system_message";
const CLEAR_CONTEXT_TOKEN: &str = "#clear_context";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    ClearContext,
    SetInstruction(String),
    ShowInstruction,
    Unrecognized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Normalized post text split into conversational prose and directive lines.
pub struct SplitText {
    pub prose: String,
    pub directives: Vec<String>,
}

impl SplitText {
    pub fn has_prose(&self) -> bool {
        !self.prose.trim().is_empty()
    }

    pub fn parsed_directives(&self) -> impl Iterator<Item = Directive> + '_ {
        self.directives
            .iter()
            .map(|line| parse_directive_line(line))
    }

    /// True when any directive line asks for the active instruction, even
    /// behind another directive on the same line.
    pub fn requests_instruction(&self) -> bool {
        self.directives.iter().any(|line| {
            directives_in_line(line).any(|directive| directive == Directive::ShowInstruction)
        })
    }
}

pub fn is_directive_line(line: &str) -> bool {
    line.split_whitespace()
        .any(|token| token.starts_with(DIRECTIVE_MARKER))
}

pub fn split_prose_and_directives(text: &str) -> SplitText {
    let mut prose_lines = Vec::new();
    let mut directives = Vec::new();
    for line in text.lines() {
        if is_directive_line(line) {
            directives.push(line.to_string());
        } else {
            prose_lines.push(line);
        }
    }
    SplitText {
        prose: prose_lines.join("\n"),
        directives,
    }
}

/// Parses one directive line. The first marker token that forms a known
/// directive wins; lines with none are `Unrecognized`.
pub fn parse_directive_line(line: &str) -> Directive {
    directives_in_line(line)
        .next()
        .unwrap_or(Directive::Unrecognized)
}

/// Every recognized directive on `line`, left to right. Marker tokens inside a
/// `#system_message(...)` argument belong to the instruction text.
pub fn directives_in_line(line: &str) -> impl Iterator<Item = Directive> + '_ {
    let mut consumed_until = 0_usize;
    marker_token_offsets(line).filter_map(move |offset| {
        if offset < consumed_until {
            return None;
        }
        let (directive, length) = parse_directive_at(&line[offset..])?;
        consumed_until = offset + length;
        Some(directive)
    })
}

fn marker_token_offsets(line: &str) -> impl Iterator<Item = usize> + '_ {
    let mut previous_is_space = true;
    line.char_indices().filter_map(move |(offset, ch)| {
        let starts_token = previous_is_space && ch == DIRECTIVE_MARKER;
        previous_is_space = ch.is_whitespace();
        starts_token.then_some(offset)
    })
}

/// Returns the directive at the start of `rest` and how many bytes it spans.
fn parse_directive_at(rest: &str) -> Option<(Directive, usize)> {
    if let Some(argument) = rest.strip_prefix(SET_INSTRUCTION_PREFIX) {
        let close = argument.rfind(')')?;
        let instruction = argument[..close].trim();
        if instruction.is_empty() {
            return None;
        }
        let length = SET_INSTRUCTION_PREFIX.len() + close + 1;
        return Some((Directive::SetInstruction(instruction.to_string()), length));
    }

    let raw_token = rest.split_whitespace().next()?;
    let token =
        raw_token.trim_end_matches(|ch: char| matches!(ch, '.' | ',' | ';' | ':' | '!' | '?'));
    let directive = match token {
        SHOW_INSTRUCTION_TOKEN => Directive::ShowInstruction,
        CLEAR_CONTEXT_TOKEN => Directive::ClearContext,
        _ => return None,
    };
    Some((directive, raw_token.len()))
}
