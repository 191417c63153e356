use std::fmt;
use std::time::Duration;

/// Outcome of a finished run. Skipped items never fail the run; they are only
/// counted here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportSummary {
    pub dry_run: bool,
    pub pages_listed: usize,
    pub pages_exported: usize,
    pub pages_skipped: usize,
    pub resources_discovered: usize,
    pub resources_fetched: usize,
    pub resources_skipped: usize,
    pub elapsed: Duration,
}

impl ExportSummary {
    pub fn skipped(&self) -> usize {
        self.pages_skipped + self.resources_skipped
    }

    pub fn is_complete(&self) -> bool {
        self.skipped() == 0
    }
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(
                f,
                "dry run: processed {}/{} pages, discovered {} resources in {:.2?}",
                self.pages_exported, self.pages_listed, self.resources_discovered, self.elapsed
            )?;
        } else {
            write!(
                f,
                "exported {}/{} pages and {}/{} resources in {:.2?}",
                self.pages_exported,
                self.pages_listed,
                self.resources_fetched,
                self.resources_discovered,
                self.elapsed
            )?;
        }
        if !self.is_complete() {
            write!(f, " ({} items skipped)", self.skipped())?;
        }
        Ok(())
    }
}
