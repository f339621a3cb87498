//! Line-oriented model of a GRUB or ISOLINUX config file.
//!
//! Lines that no rewrite touches are rendered back byte for byte (apart from
//! `\r\n` becoming `\n`). A rewritten line keeps its indentation and has its
//! words joined by single spaces.

/// A boot config file split into lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    lines: Vec<String>,
    trailing_newline: bool,
}

/// Leading whitespace and the whitespace-separated words of a line.
fn split_line(line: &str) -> (&str, Vec<&str>) {
    let body = line.trim_start();
    let indent = &line[..line.len() - body.len()];
    (indent, body.split_whitespace().collect())
}

fn join_line(indent: &str, words: &[&str]) -> String {
    format!("{}{}", indent, words.join(" "))
}

/// First word of a line, if any.
fn keyword(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

/// `key=` part of a kernel parameter, or the whole word for bare flags.
fn param_key(word: &str) -> &str {
    match word.find('=') {
        Some(idx) => &word[..=idx],
        None => word,
    }
}

fn same_param(existing: &str, wanted: &str) -> bool {
    let key = param_key(wanted);
    if key.ends_with('=') {
        existing.starts_with(key)
    } else {
        existing == key
    }
}

impl BootConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            trailing_newline: text.ends_with('\n'),
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True if `line` starts with one of `directives` (case-insensitive).
    pub fn is_directive(line: &str, directives: &[&str]) -> bool {
        keyword(line).is_some_and(|k| directives.iter().any(|d| k.eq_ignore_ascii_case(d)))
    }

    /// Delete every word equal to one of `tokens`. Returns words removed.
    pub fn strip_tokens(&mut self, tokens: &[&str]) -> usize {
        let mut removed = 0;
        for line in &mut self.lines {
            let (indent, words) = split_line(line);
            let kept: Vec<&str> = words
                .iter()
                .copied()
                .filter(|w| !tokens.contains(w))
                .collect();
            if kept.len() != words.len() {
                removed += words.len() - kept.len();
                *line = join_line(indent, &kept);
            }
        }
        removed
    }

    /// Make every line starting with one of `directives` end with `params`,
    /// each present exactly once. An existing `key=` parameter with the same
    /// key is replaced. Returns the number of kernel lines.
    pub fn append_kernel_params(&mut self, directives: &[&str], params: &[String]) -> usize {
        let mut touched = 0;
        for line in &mut self.lines {
            if !Self::is_directive(line, directives) {
                continue;
            }
            let (indent, words) = split_line(line);
            let (head, args) = words.split_at(1);
            let mut out: Vec<&str> = head.to_vec();
            out.extend(
                args.iter()
                    .copied()
                    .filter(|w| !params.iter().any(|p| same_param(w, p))),
            );
            out.extend(params.iter().map(String::as_str));
            *line = join_line(indent, &out);
            touched += 1;
        }
        touched
    }

    /// Set a GRUB variable (`set name=value`) everywhere it is assigned,
    /// or append the assignment at the end. Returns assignments rewritten.
    ///
    /// Appending keeps the value after any `source`d file that might set it.
    pub fn set_grub_var(&mut self, name: &str, value: &str) -> usize {
        let prefix = format!("{}=", name);
        let mut rewritten = 0;
        for line in &mut self.lines {
            let (indent, words) = split_line(line);
            if words.len() >= 2 && words[0] == "set" && words[1].starts_with(&prefix) {
                *line = format!("{}set {}{}", indent, prefix, value);
                rewritten += 1;
            }
        }
        if rewritten == 0 {
            self.lines.push(format!("set {}{}", prefix, value));
        }
        rewritten
    }

    /// Set an ISOLINUX option (`KEYWORD value`, keyword case-insensitive),
    /// or append it after any `include`. Returns options rewritten.
    pub fn set_option(&mut self, name: &str, value: &str) -> usize {
        let mut rewritten = 0;
        for line in &mut self.lines {
            let (indent, words) = split_line(line);
            if words.first().is_some_and(|k| k.eq_ignore_ascii_case(name)) {
                *line = format!("{}{} {}", indent, words[0], value);
                rewritten += 1;
            }
        }
        if rewritten == 0 {
            self.lines.push(format!("{} {}", name, value));
        }
        rewritten
    }

    fn is_menu_default(line: &str) -> bool {
        let (_, words) = split_line(line);
        words.len() == 2
            && words[0].eq_ignore_ascii_case("menu")
            && words[1].eq_ignore_ascii_case("default")
    }

    /// Number of `menu default` lines.
    pub fn menu_default_count(&self) -> usize {
        self.lines.iter().filter(|l| Self::is_menu_default(l)).count()
    }

    /// Remove every `menu default` line. Returns lines removed.
    pub fn clear_menu_defaults(&mut self) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| !Self::is_menu_default(l));
        before - self.lines.len()
    }

    /// Make the first `label` block the one and only default entry.
    ///
    /// Returns the line index of the inserted marker, or `None` when the file
    /// has no `label` line.
    pub fn mark_first_label_default(&mut self) -> Option<usize> {
        self.clear_menu_defaults();
        let label = self
            .lines
            .iter()
            .position(|l| Self::is_directive(l, &["label"]))?;

        let label_indent = split_line(&self.lines[label]).0.len();
        let indent = self
            .lines
            .get(label + 1)
            .map(|next| split_line(next).0)
            .filter(|ind| ind.len() > label_indent)
            .unwrap_or("\t")
            .to_string();

        let at = label + 1;
        self.lines.insert(at, format!("{}menu default", indent));
        Some(at)
    }
}
