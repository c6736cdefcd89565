// block.rs — Source blocks, commands, and evaluation outputs.
//
// A source file is a sequence of blocks (paragraphs). Each block carries
// its raw text, its byte offset in the enclosing file, and a kind tag that
// the pipeline driver dispatches on. Outputs are the tagged records a block
// evaluation emits, in order.

use std::fmt;

use serde::Serialize;

use crate::ast::FModule;
use crate::backend::Val;
use crate::diag::Err;
use crate::names::Name;

// ── Source blocks ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SourceBlock {
    /// Raw text of the block, exactly as sliced from the file.
    pub text: String,
    /// Byte offset of the block's start within the file.
    pub offset: usize,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Plain declarations: evaluate and keep the environment delta.
    RunModule(FModule),
    /// A command over a module binding one scrutinee variable.
    Command(Cmd, (Name, FModule)),
    IncludeSourceFile(String),
    LoadData(String),
    Unparseable(String),
    /// Blank or comment-only block.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    EvalExpr(OutFormat),
    GetType,
    ShowPasses,
    ShowPass(String),
    /// Parsed but currently inert.
    TimeIt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutFormat {
    Default,
    Json,
}

// ── Outputs ──────────────────────────────────────────────────────────────

/// A tagged record emitted during block evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Output {
    ValOut(OutFormat, Val),
    TextOut(String),
    /// One pass's name and pretty-printed result.
    PassInfo(String, String),
}

impl Output {
    pub fn is_pass_info(&self) -> bool {
        matches!(self, Output::PassInfo(_, _))
    }
}

// Display carries the human rendering; the JSON rendering goes through
// serde in the CLI layer.
impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::ValOut(OutFormat::Default, v) => write!(f, "{}", v),
            Output::ValOut(OutFormat::Json, v) => {
                let rendered = serde_json::to_string(v).unwrap_or_else(|_| v.to_string());
                write!(f, "{}", rendered)
            }
            Output::TextOut(s) => write!(f, "{}", s),
            Output::PassInfo(name, text) => write!(f, "=== {} ===\n{}", name, text),
        }
    }
}

// ── Block results ────────────────────────────────────────────────────────

/// What a block evaluation hands back to the caller, alongside the delta.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockResult {
    pub outputs: Vec<Output>,
    pub outcome: Result<(), Err>,
}

impl BlockResult {
    pub fn ok(outputs: Vec<Output>) -> Self {
        Self {
            outputs,
            outcome: Ok(()),
        }
    }

    pub fn failed(outputs: Vec<Output>, err: Err) -> Self {
        Self {
            outputs,
            outcome: Err(err),
        }
    }
}

/// Keep only the outputs matching `keep`. The driver buffers a module
/// evaluation's outputs and replays the survivors, rather than gating
/// emissions at the source.
pub fn filter_outputs(outputs: Vec<Output>, keep: impl Fn(&Output) -> bool) -> Vec<Output> {
    outputs.into_iter().filter(|o| keep(o)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_order() {
        let outs = vec![
            Output::TextOut("a".into()),
            Output::PassInfo("simplify".into(), "x = 1\n".into()),
            Output::TextOut("b".into()),
        ];
        let kept = filter_outputs(outs, |o| !o.is_pass_info());
        assert_eq!(
            kept,
            vec![Output::TextOut("a".into()), Output::TextOut("b".into())]
        );
    }

    #[test]
    fn pass_info_display() {
        let o = Output::PassInfo("imp".into(), "x = 1\n".into());
        assert_eq!(o.to_string(), "=== imp ===\nx = 1\n");
    }

    #[test]
    fn val_out_json_display() {
        let o = Output::ValOut(OutFormat::Json, Val::Int(3));
        assert_eq!(o.to_string(), "{\"Int\":3}");
    }
}
