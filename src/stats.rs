use std::io::Write;

use crate::util;

/// Progress of one media download, redrawn in place on stderr.
pub struct DownloadStatistics {
    pub label: String,
    pub bytes_downloaded: u64,
    pub segments_downloaded: u64,
    pub segments_total: u64,
}

impl DownloadStatistics {
    pub fn new(label: impl Into<String>, segments_total: u64) -> Self {
        Self {
            label: label.into(),
            bytes_downloaded: 0,
            segments_downloaded: 0,
            segments_total,
        }
    }

    pub fn add_segment(&mut self, bytes: u64) {
        self.segments_downloaded += 1;
        self.bytes_downloaded += bytes;
    }

    pub fn percent(&self) -> f64 {
        if self.segments_total == 0 {
            return 100.0;
        }
        self.segments_downloaded as f64 * 100.0 / self.segments_total as f64
    }

    pub fn line(&self) -> String {
        format!(
            "[{}] {:.1}% ({} of {} segments, {})",
            self.label,
            self.percent(),
            self.segments_downloaded,
            self.segments_total,
            util::format_bytes(self.bytes_downloaded)
        )
    }

    pub fn print(&self) {
        eprint!("\x1b[2K\r{}", self.line());
        let _ = std::io::stderr().lock().flush();
    }

    pub fn finish(&self) {
        self.print();
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line() {
        let mut stats = DownloadStatistics::new("movie:abc", 4);
        stats.add_segment(1024);
        stats.add_segment(1024);

        assert_eq!(stats.percent(), 50.0);
        assert_eq!(stats.line(), "[movie:abc] 50.0% (2 of 4 segments, 2.00 KiB)");
    }

    #[test]
    fn empty_download_is_complete() {
        assert_eq!(DownloadStatistics::new("x", 0).percent(), 100.0);
    }
}
