use serde::{Deserialize, Serialize};

/// Source position of an SSA instruction or declaration.
///
/// `file_id` indexes `Program::files`. Line and column are 1-based; a zero
/// line means the position is unknown (synthetic code).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { file_id: 0, line, column }
    }

    pub fn with_file(file_id: u32, line: u32, column: u32) -> Self {
        Self { file_id, line, column }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }

    /// Render as `file:line:column` against the program's file table.
    pub fn render(&self, files: &[String]) -> String {
        if !self.is_known() {
            return "<unknown position>".to_string();
        }
        let file = files
            .get(self.file_id as usize)
            .map(String::as_str)
            .unwrap_or("<unknown file>");
        format!("{file}:{}:{}", self.line, self.column)
    }
}
