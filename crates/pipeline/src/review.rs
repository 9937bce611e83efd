//! Interactive review before publication

use secdigest_common::errors::Result;
use secdigest_common::PaperRecord;
use std::io::{BufRead, Write};

/// Gate between selection and publication
pub trait ShareReview {
    /// `true` to publish `records`
    fn confirm(&mut self, records: &[PaperRecord]) -> Result<bool>;
}

/// Approves everything (`--yes`)
pub struct AutoApprove;

impl ShareReview for AutoApprove {
    fn confirm(&mut self, _records: &[PaperRecord]) -> Result<bool> {
        Ok(true)
    }
}

/// Lists the selection and asks for a yes/no answer
pub struct PromptReview<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptReview<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptReview<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ShareReview for PromptReview<R, W> {
    fn confirm(&mut self, records: &[PaperRecord]) -> Result<bool> {
        writeln!(self.output, "\n{} papers ready to publish:\n", records.len())?;
        for record in records {
            let tag = record.tag.map(|t| t.as_str()).unwrap_or("general");
            writeln!(
                self.output,
                "  [{:>2}/10] #{:<8} {}\n            {}",
                record.effective_score(),
                tag,
                record.title,
                record.url
            )?;
        }
        write!(self.output, "\nPublish these papers? [y/N] ")?;
        self.output.flush()?;

        let mut answer = String::new();
        // EOF counts as "no"
        if self.input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<PaperRecord> {
        vec![PaperRecord::discovered(
            "2601.00001v1",
            "http://arxiv.org/pdf/2601.00001v1.pdf",
            "2026-01-15T10:30:00Z",
            "Test Paper Alpha",
            vec![],
        )]
    }

    fn answer(input: &str) -> (bool, String) {
        let mut output = Vec::new();
        let confirmed = PromptReview::new(input.as_bytes(), &mut output)
            .confirm(&records())
            .unwrap();
        (confirmed, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_yes_publishes() {
        let (confirmed, shown) = answer("y\n");
        assert!(confirmed);
        assert!(shown.contains("1 papers ready to publish"));
        assert!(shown.contains("Test Paper Alpha"));
        assert!(shown.contains("[ 5/10]"));
        assert!(answer("YES\n").0);
    }

    #[test]
    fn test_anything_else_declines() {
        assert!(!answer("n\n").0);
        assert!(!answer("\n").0);
        assert!(!answer("").0);
    }
}
