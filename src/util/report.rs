use ahash::AHashMap;
use std::{
    fmt,
    ops::{Index, IndexMut},
};

/// Named values collected over one epoch, printed sorted by key
#[derive(Clone, Debug, Default)]
pub struct Report {
    title: String,
    data: AHashMap<String, f64>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}{}{}", "-".repeat(20), self.title, "-".repeat(20))?;
        let mut items: Vec<_> = self.data.iter().collect();
        items.sort_unstable_by(|a, b| a.0.cmp(b.0));

        for (key, val) in items {
            writeln!(f, "\t{key}: {val:.6}")?;
        }
        Ok(())
    }
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: AHashMap::new(),
        }
    }
}

impl Index<&str> for Report {
    type Output = f64;

    fn index(&self, key: &str) -> &Self::Output {
        &self.data[key]
    }
}

impl IndexMut<&str> for Report {
    fn index_mut(&mut self, key: &str) -> &mut Self::Output {
        self.data.entry(key.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_sorts_keys() {
        let mut report = Report::new("Epoch 3");
        report["Test loss"] = 0.5;
        report["Seconds since last report"] = 1.25;
        report["Training loss"] = 0.75;

        let text = report.to_string();
        let seconds = text.find("Seconds since last report: 1.250000").unwrap();
        let test = text.find("Test loss: 0.500000").unwrap();
        let train = text.find("Training loss: 0.750000").unwrap();
        assert!(text.starts_with("--------------------Epoch 3"));
        assert!(seconds < test && test < train);
        assert_eq!(report["Test loss"], 0.5);
    }
}
