use std::borrow::Cow;
use std::sync::{Arc, RwLock};

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

use crate::complete;
use crate::index::SymbolIndex;

/// The live symbol index shared with the background refresher: rebuilds swap
/// the inner `Arc` so readers always see one consistent snapshot.
pub type SharedIndex = Arc<RwLock<Arc<SymbolIndex>>>;

/// rustyline line helper wiring the completion engine and history-based
/// inline hints into the editor.
pub struct ReplHelper {
    index: SharedIndex,
    hinter: HistoryHinter,
}

impl ReplHelper {
    pub fn new(index: SharedIndex) -> Self {
        Self {
            index,
            hinter: HistoryHinter::new(),
        }
    }

    fn snapshot(&self) -> Arc<SymbolIndex> {
        self.index
            .read()
            .map(|guard| Arc::clone(&*guard))
            .unwrap_or_default()
    }
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let index = self.snapshot();
        let (cands, start, _end) = complete::candidates(&index, line, pos);
        let pairs = cands
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &Context<'_>) -> Option<String> {
        self.hinter.hint(line, pos, ctx)
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        // Ghost suggestion: rendered dim, accepted with Right-Arrow.
        Cow::Owned(format!("\x1b[2m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}

impl Helper for ReplHelper {}
