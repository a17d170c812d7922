// src/format.rs
//! Human-scale rendering of metric totals (`formatted_value`).

/// How a metric's total is rendered for the at-rest counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    /// `1.2K`, `3.4M`, `5.6B`, `7.8T`; plain integer below 1000.
    Suffix,
    /// Bases as petabases, always `PB`.
    Petabases,
    /// Bases as terabases, falling back to gigabases below 1 TB.
    Terabases,
    /// Whole millions, e.g. `250M`.
    Millions,
}

impl Notation {
    pub fn render(self, n: f64) -> String {
        match self {
            Notation::Suffix => format_number(n),
            Notation::Petabases => format!("{:.1} PB", n / 1e15),
            Notation::Terabases => {
                if n >= 1e12 {
                    format!("{:.1} TB", n / 1e12)
                } else {
                    format!("{:.1} GB", n / 1e9)
                }
            }
            Notation::Millions => format!("{:.0}M", n / 1e6),
        }
    }
}

/// Format a number with the appropriate magnitude suffix (K, M, B, T).
pub fn format_number(n: f64) -> String {
    if n >= 1e12 {
        format!("{:.1}T", n / 1e12)
    } else if n >= 1e9 {
        format!("{:.1}B", n / 1e9)
    } else if n >= 1e6 {
        format!("{:.1}M", n / 1e6)
    } else if n >= 1e3 {
        format!("{:.1}K", n / 1e3)
    } else {
        format!("{}", n.trunc() as i64)
    }
}
