//! Command-executor identities.

/// The identity a host command runs as. The host writes every output line of
/// the command to it.
pub trait CommandSender: Send {
    fn name(&self) -> &str;

    fn send_line(&mut self, line: &str);
}

/// Sender with no output device: lines are buffered in order instead of printed.
///
/// One instance per dispatch; drop it once the reply has been extracted.
#[derive(Debug, Default)]
pub struct LineCaptureSender {
    lines: Vec<String>,
}

impl LineCaptureSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// First non-blank captured line, if any.
    pub fn line(&self) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|l| !l.trim().is_empty())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl CommandSender for LineCaptureSender {
    fn name(&self) -> &str {
        "Telegram"
    }

    fn send_line(&mut self, line: &str) {
        // Multi-line writes are split so `line()` can skip blank leading lines.
        if line.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.extend(line.lines().map(str::to_string));
        }
    }
}
