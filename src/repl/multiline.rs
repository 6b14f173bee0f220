//! Normalization of multi-line pasted input.
//!
//! `terraform console` evaluates one line at a time, and HCL collection
//! literals pasted across lines frequently omit the commas the single-line
//! form needs. `normalize_commas` inserts them, aware of strings, comments
//! and nesting; `normalize_for_history` flattens an accepted multi-line input
//! into the single line stored in history.

#[derive(Clone, Copy)]
struct Frame {
    opener: char,
    index_in_stack: usize,
    /// Last significant rune seen at this frame's base depth.
    last_sig: char,
    /// Whether the current line produced any token at base depth.
    line_has_token: bool,
    /// Whether any comma was inserted inside this frame.
    inserted_any: bool,
}

struct Normalizer {
    runes: Vec<char>,
    out: Vec<char>,
    stack: Vec<char>,
    frames: Vec<Frame>,
}

/// Insert the commas a multi-line `[]`/`{}` literal needs to parse as a
/// single expression. Strings and comments are left untouched; no comma is
/// inserted after `=`, before `:` or `=>`, or before the closing bracket of
/// the current frame. Lists that received inter-item commas also get a
/// trailing comma; objects never do. Applying the normalization twice is a
/// no-op.
pub fn normalize_commas(input: &str) -> String {
    if !input.contains('\n') {
        return input.to_string();
    }
    let mut n = Normalizer {
        runes: input.chars().collect(),
        out: Vec::with_capacity(input.len() + 8),
        stack: Vec::new(),
        frames: Vec::new(),
    };
    n.run();
    n.out.into_iter().collect()
}

impl Normalizer {
    fn at_base_depth(&self) -> bool {
        match self.frames.last() {
            Some(top) => {
                self.stack.len() == top.index_in_stack + 1
                    && self.stack.last() == Some(&top.opener)
            }
            None => false,
        }
    }

    fn set_last_sig(&mut self, r: char) {
        if self.at_base_depth() {
            if let Some(top) = self.frames.last_mut() {
                top.last_sig = r;
            }
        }
    }

    fn mark_token(&mut self) {
        if self.at_base_depth() {
            if let Some(top) = self.frames.last_mut() {
                top.line_has_token = true;
            }
        }
    }

    /// Insert a comma before any trailing spaces/tabs (and before a trailing
    /// newline) at the end of the output buffer.
    fn insert_comma_before_trailing_space(&mut self) {
        let mut j = self.out.len();
        while j > 0 && matches!(self.out[j - 1], ' ' | '\t') {
            j -= 1;
        }
        if j > 0 && self.out[j - 1] == '\n' {
            self.out.insert(j - 1, ',');
        } else {
            self.out.insert(j, ',');
        }
    }

    fn insert_comma_at_line_end(&mut self) {
        match self.out.last() {
            None => self.out.push(','),
            Some('\n') => {
                let pos = self.out.len() - 1;
                self.out.insert(pos, ',');
            }
            Some(_) => self.insert_comma_before_trailing_space(),
        }
    }

    /// Next significant rune after position `i`, skipping whitespace and
    /// comments, plus the rune following it (for `=>`).
    fn next_significant_after(&self, i: usize) -> (char, char) {
        let mut j = i + 1;
        while j < self.runes.len() {
            let r = self.runes[j];
            if matches!(r, ' ' | '\t' | '\r') {
                j += 1;
                continue;
            }
            if r == '#' {
                while j < self.runes.len() && self.runes[j] != '\n' {
                    j += 1;
                }
                continue;
            }
            if r == '/' && j + 1 < self.runes.len() {
                if self.runes[j + 1] == '/' {
                    while j < self.runes.len() && self.runes[j] != '\n' {
                        j += 1;
                    }
                    continue;
                }
                if self.runes[j + 1] == '*' {
                    j += 2;
                    while j < self.runes.len() {
                        if self.runes[j] == '/' && j > 0 && self.runes[j - 1] == '*' {
                            j += 1;
                            break;
                        }
                        j += 1;
                    }
                    continue;
                }
            }
            let next = self.runes.get(j + 1).copied().unwrap_or('\0');
            return (r, next);
        }
        ('\0', '\0')
    }

    fn handle_newline(&mut self, i: usize) {
        if !self.at_base_depth() {
            return;
        }
        let Some(top) = self.frames.last().copied() else {
            return;
        };
        if !top.line_has_token {
            return;
        }
        let skip = top.last_sig == ','
            || top.last_sig == top.opener
            || matches!(top.last_sig, '=' | ':' | '>');
        if skip {
            if let Some(f) = self.frames.last_mut() {
                f.line_has_token = false;
            }
            return;
        }
        let (nx, nx2) = self.next_significant_after(i);
        let continues_entry = nx == ':' || (nx == '=' && nx2 == '>');
        let closes_frame =
            (top.opener == '{' && nx == '}') || (top.opener == '[' && nx == ']');
        if continues_entry || closes_frame {
            if let Some(f) = self.frames.last_mut() {
                f.line_has_token = false;
            }
            return;
        }
        self.out.push(',');
        if let Some(f) = self.frames.last_mut() {
            f.last_sig = ',';
            f.line_has_token = false;
            f.inserted_any = true;
        }
    }

    /// Before a closing bracket, add the trailing comma lists earned. Only
    /// `[]` frames that already received inter-item commas qualify; objects
    /// never take a trailing comma.
    fn handle_before_close(&mut self) {
        if !self.at_base_depth() {
            return;
        }
        let Some(top) = self.frames.last().copied() else {
            return;
        };
        if top.opener == '['
            && top.last_sig != ','
            && top.last_sig != top.opener
            && top.last_sig != '\0'
            && top.inserted_any
        {
            self.insert_comma_at_line_end();
            if let Some(f) = self.frames.last_mut() {
                f.last_sig = ',';
            }
        }
    }

    fn comma_before_comment(&mut self) {
        if !self.at_base_depth() {
            return;
        }
        let Some(top) = self.frames.last().copied() else {
            return;
        };
        if top.line_has_token
            && top.last_sig != ','
            && top.last_sig != top.opener
            && top.last_sig != '='
        {
            self.insert_comma_before_trailing_space();
            if let Some(f) = self.frames.last_mut() {
                f.last_sig = ',';
            }
        }
    }

    fn run(&mut self) {
        let mut in_string = false;
        let mut string_esc = false;
        let mut in_line_comment = false;
        let mut in_block_comment = false;

        let mut i = 0;
        while i < self.runes.len() {
            let r = self.runes[i];

            if in_line_comment {
                if r == '\n' {
                    self.handle_newline(i);
                    self.out.push(r);
                    in_line_comment = false;
                    if self.at_base_depth() {
                        if let Some(f) = self.frames.last_mut() {
                            f.line_has_token = false;
                        }
                    }
                } else {
                    self.out.push(r);
                }
                i += 1;
                continue;
            }
            if in_block_comment {
                self.out.push(r);
                if r == '/' && self.out.len() >= 2 && self.out[self.out.len() - 2] == '*' {
                    in_block_comment = false;
                }
                i += 1;
                continue;
            }
            if in_string {
                self.out.push(r);
                if string_esc {
                    string_esc = false;
                } else if r == '\\' {
                    string_esc = true;
                } else if r == '"' {
                    in_string = false;
                    self.set_last_sig('"');
                    self.mark_token();
                }
                i += 1;
                continue;
            }

            if r == '#' {
                self.comma_before_comment();
                in_line_comment = true;
                self.out.push(r);
                i += 1;
                continue;
            }
            if r == '/' && i + 1 < self.runes.len() {
                if self.runes[i + 1] == '/' {
                    self.comma_before_comment();
                    in_line_comment = true;
                    self.out.push(r);
                    i += 1;
                    continue;
                }
                if self.runes[i + 1] == '*' {
                    in_block_comment = true;
                    self.out.push(r);
                    i += 1;
                    continue;
                }
            }

            match r {
                '"' => {
                    in_string = true;
                    self.out.push(r);
                }
                '\n' => {
                    self.handle_newline(i);
                    self.out.push(r);
                }
                '(' => {
                    self.stack.push('(');
                    self.out.push(r);
                }
                ')' => {
                    if self.stack.last() == Some(&'(') {
                        self.stack.pop();
                    }
                    self.out.push(r);
                }
                '[' | '{' => {
                    self.stack.push(r);
                    self.frames.push(Frame {
                        opener: r,
                        index_in_stack: self.stack.len() - 1,
                        last_sig: r,
                        line_has_token: false,
                        inserted_any: false,
                    });
                    self.out.push(r);
                }
                ']' | '}' => {
                    self.handle_before_close();
                    self.stack.pop();
                    if let Some(top) = self.frames.last() {
                        if (r == ']' && top.opener == '[') || (r == '}' && top.opener == '{') {
                            self.frames.pop();
                        }
                    }
                    self.out.push(r);
                    self.set_last_sig(r);
                    self.mark_token();
                }
                _ if r.is_whitespace() => {
                    self.out.push(r);
                }
                _ => {
                    self.out.push(r);
                    self.set_last_sig(r);
                    self.mark_token();
                }
            }
            i += 1;
        }
    }
}

/// Compact a possibly multi-line input into the single line stored in
/// history: CR/LF become line breaks that are trimmed, emptied and joined
/// with single spaces, bracket boundaries are tightened, and `=` gets single
/// surrounding spaces (never touching `=>`). Inner token spacing within each
/// original line is preserved.
pub fn normalize_for_history(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let joined = input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let compacted = compact_bracket_boundaries(&joined);
    normalize_equals_spacing(&compacted)
}

fn is_opener(r: char) -> bool {
    matches!(r, '(' | '[' | '{')
}

fn is_closer(r: char) -> bool {
    matches!(r, ')' | ']' | '}')
}

/// Remove spaces right after `(`/`{` and right before any closer; `[` keeps a
/// single space before its first non-bracket token so list contents stay
/// readable.
fn compact_bracket_boundaries(s: &str) -> String {
    let runes: Vec<char> = s.chars().collect();
    let mut out = Vec::with_capacity(runes.len());
    let mut i = 0;
    while i < runes.len() {
        let r = runes[i];
        if is_opener(r) {
            out.push(r);
            i += 1;
            let mut j = i;
            while j < runes.len() && matches!(runes[j], ' ' | '\t') {
                j += 1;
            }
            if j < runes.len() {
                let next = runes[j];
                if r == '[' && !is_opener(next) && !is_closer(next) && j > i {
                    out.push(' ');
                }
                i = j;
            }
            continue;
        }
        if matches!(r, ' ' | '\t') {
            let mut j = i;
            while j < runes.len() && matches!(runes[j], ' ' | '\t') {
                j += 1;
            }
            if j < runes.len() && is_closer(runes[j]) {
                i = j;
                continue;
            }
            out.push(r);
            i += 1;
            continue;
        }
        out.push(r);
        i += 1;
    }
    out.into_iter().collect()
}

fn normalize_equals_spacing(s: &str) -> String {
    let runes: Vec<char> = s.chars().collect();
    let mut out: Vec<char> = Vec::with_capacity(runes.len());
    let mut in_string = false;
    let mut escape = false;
    let mut i = 0;
    while i < runes.len() {
        let r = runes[i];
        if in_string {
            out.push(r);
            if escape {
                escape = false;
            } else if r == '\\' {
                escape = true;
            } else if r == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if r == '"' {
            in_string = true;
            out.push(r);
            i += 1;
            continue;
        }
        if r == '=' && runes.get(i + 1) != Some(&'>') {
            while matches!(out.last(), Some(' ') | Some('\t')) {
                out.pop();
            }
            if let Some(&prev) = out.last() {
                if !is_opener(prev) && prev != ' ' {
                    out.push(' ');
                }
            }
            out.push('=');
            let mut j = i + 1;
            while j < runes.len() && matches!(runes[j], ' ' | '\t') {
                j += 1;
            }
            if j < runes.len() && !is_closer(runes[j]) && runes[j] != ',' {
                out.push(' ');
            }
            i = j;
            continue;
        }
        out.push(r);
        i += 1;
    }
    out.into_iter().collect()
}
