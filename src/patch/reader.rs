use super::Mode;

/// Line source that tracks 1-based line numbers for error reporting.
pub(crate) struct LineReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line_number: usize,
}

impl<'a> LineReader<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            line_number: 0,
        }
    }

    /// Line number of the most recently returned line.
    pub(crate) fn line_number(&self) -> usize {
        self.line_number
    }

    /// Next trimmed line that is neither blank nor a `//` comment.
    pub(crate) fn next_significant(&mut self) -> Option<(usize, &'a str)> {
        for (index, raw) in self.lines.by_ref() {
            self.line_number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            return Some((self.line_number, line));
        }
        None
    }
}

/// One script line split into mode prefix, command name and arguments.
#[derive(Clone, Debug)]
pub(crate) struct Command<'a> {
    pub(crate) mode: Mode,
    pub(crate) name: String,
    pub(crate) args: Vec<&'a str>,
    offsets: Vec<usize>,
    line: &'a str,
}

impl<'a> Command<'a> {
    pub(crate) fn parse(line: &'a str) -> Result<Self, String> {
        let mut chars = line.chars();
        let prefix = chars.next().ok_or_else(|| "empty line".to_string())?;
        let mode = Mode::from_prefix(prefix)
            .ok_or_else(|| format!("Unknown mode '{prefix}', expected one of '.', '+', '-'"))?;

        let mut tokens = tokenize(line, prefix.len_utf8());
        if tokens.first().map(|(offset, _)| *offset) != Some(prefix.len_utf8()) {
            return Err("Missing command name".to_string());
        }
        let (_, name) = tokens.remove(0);
        Ok(Self {
            mode,
            name: name.to_ascii_lowercase(),
            offsets: tokens.iter().map(|(offset, _)| *offset).collect(),
            args: tokens.into_iter().map(|(_, token)| token).collect(),
            line,
        })
    }

    /// Raw text from argument `index` to the end of the line, spacing kept.
    pub(crate) fn rest_from(&self, index: usize) -> &'a str {
        match self.offsets.get(index) {
            Some(offset) => &self.line[*offset..],
            None => "",
        }
    }
}

fn tokenize(line: &str, start: usize) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut token_start = None;
    for (offset, ch) in line[start..].char_indices() {
        let offset = offset + start;
        match (ch.is_whitespace(), token_start) {
            (true, Some(begin)) => {
                tokens.push((begin, &line[begin..offset]));
                token_start = None;
            }
            (false, None) => token_start = Some(offset),
            _ => {}
        }
    }
    if let Some(begin) = token_start {
        tokens.push((begin, &line[begin..]));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_splits_mode_name_and_args() {
        let command = Command::parse("+Invoke-Virtual ~A  ~run ()V").expect("parse");
        assert_eq!(command.mode, Mode::Add);
        assert_eq!(command.name, "invoke-virtual");
        assert_eq!(command.args, vec!["~A", "~run", "()V"]);
        assert_eq!(command.rest_from(1), "~run ()V");
    }

    #[test]
    fn rest_keeps_inner_spacing() {
        let command = Command::parse(".push-string \"a  b\"").expect("parse");
        assert_eq!(command.rest_from(0), "\"a  b\"");
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        let err = Command::parse("*class A").expect_err("prefix");
        assert!(err.contains("Unknown mode"), "{err}");
        assert!(Command::parse(". class").is_err());
    }

    #[test]
    fn reader_skips_comments_and_counts_lines() {
        let mut reader = LineReader::new("// header\n\n  .class A\n");
        assert_eq!(reader.next_significant(), Some((3, ".class A")));
        assert_eq!(reader.line_number(), 3);
        assert_eq!(reader.next_significant(), None);
    }
}
