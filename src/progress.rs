use std::path::PathBuf;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressInfo {
    pub current_item_index: Option<usize>,
    pub total_items: usize,
    pub current_item_name: Option<PathBuf>,
    pub transfer: Option<TransferStats>,
}

impl ProgressInfo {
    pub fn batch_fraction(&self) -> f32 {
        match self.current_item_index {
            Some(index) if self.total_items > 0 => {
                let done = index as f32 + self.item_fraction();
                (done / self.total_items as f32).min(1.0)
            }
            _ => 0.0,
        }
    }

    pub fn item_fraction(&self) -> f32 {
        self.transfer
            .as_ref()
            .map_or(0.0, |t| f32::from(t.percent.min(100)) / 100.0)
    }
}

/// One parsed progress line of the sync tool, e.g.
/// `  1,234,567  45%    1.23MB/s    0:00:12 (xfr#3, to-chk=10/20)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub transferred: String,
    pub percent: u8,
    pub rate: String,
    pub eta: String,
}

impl TransferStats {
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let at = tokens.iter().position(|t| t.ends_with('%'))?;
        let percent = tokens[at].trim_end_matches('%').parse().ok()?;
        let field = |offset: usize| tokens.get(offset).map(|t| t.to_string()).unwrap_or_default();
        Some(Self {
            transferred: at.checked_sub(1).map(|i| field(i)).unwrap_or_default(),
            percent,
            rate: field(at + 1),
            eta: field(at + 2),
        })
    }
}
