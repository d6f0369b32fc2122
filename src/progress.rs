//! Console progress for file transfers.
//!
//! The bar is a row of `#` that grows across the full terminal width as bytes move. It is a
//! local display only and never touches the wire.
use indicatif::{ProgressBar, ProgressStyle};

/// Where transfer progress is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// draw a bar on stderr, sized to the terminal width
    Console,
    /// draw nothing
    Hidden,
}

impl Progress {
    /// builds a bar for a transfer of `len` bytes
    pub(crate) fn bar(self, len: u64) -> ProgressBar {
        match self {
            Progress::Hidden => ProgressBar::hidden(),
            Progress::Console => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template("{wide_bar} {bytes}/{total_bytes}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#> "),
                );
                bar
            }
        }
    }
}
