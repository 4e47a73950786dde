/*!
 * Run report for repoprompt
 *
 * Renders what was packed as console tables using the tabled library.
 */

use std::time::Duration;

use tabled::{
    settings::{object::Columns, Alignment, Modify, Padding, Style},
    Table, Tabled,
};

use crate::types::{FileContent, ProcessingResult, XmlChunk};
use crate::utils::{estimate_tokens, format_file_size};

/// Per-file figures shown in the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReportInfo {
    /// Relative path
    pub path: String,
    /// Size on disk
    pub size: u64,
    /// Lines embedded
    pub lines: usize,
    /// Characters embedded
    pub chars: usize,
    /// Why the content was left out, if it was
    pub elided: Option<String>,
}

/// Statistics for one invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Where the chunks went
    pub outputs: Vec<String>,
    /// Wall time from the start of the walk to the last write
    pub duration: Duration,
    /// Per-file details, in output order
    pub files: Vec<FileReportInfo>,
    /// Number of chunks written
    pub chunks: usize,
    /// Total bytes of XML produced
    pub xml_bytes: usize,
    /// Number of skipped items and files
    pub skipped: usize,
}

impl RunReport {
    /// Collect report figures from a finished run
    pub fn new(
        result: &ProcessingResult,
        chunks: &[XmlChunk],
        outputs: Vec<String>,
        duration: Duration,
    ) -> Self {
        let files = result
            .files
            .iter()
            .map(|file| match &file.content {
                FileContent::Text(text) => FileReportInfo {
                    path: file.path.clone(),
                    size: file.size,
                    lines: text.lines().count(),
                    chars: text.chars().count(),
                    elided: None,
                },
                FileContent::Elided(reason) => FileReportInfo {
                    path: file.path.clone(),
                    size: file.size,
                    lines: 0,
                    chars: 0,
                    elided: Some(reason.to_string()),
                },
            })
            .collect();

        Self {
            outputs,
            duration,
            files,
            chunks: chunks.len(),
            xml_bytes: chunks.iter().map(|chunk| chunk.content.len()).sum(),
            skipped: result.skipped.len(),
        }
    }

    /// Characters of embedded content across all files
    pub fn total_chars(&self) -> usize {
        self.files.iter().map(|file| file.chars).sum()
    }

    /// Lines of embedded content across all files
    pub fn total_lines(&self) -> usize {
        self.files.iter().map(|file| file.lines).sum()
    }
}

/// Report generator for run results
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter;

impl Reporter {
    /// Create a new reporter
    pub fn new() -> Self {
        Self
    }

    /// Format a number with human-readable units
    fn format_number(&self, num: usize) -> String {
        if num >= 1_000_000 {
            format!("{:.1}M", num as f64 / 1_000_000.0)
        } else if num >= 1_000 {
            format!("{:.1}K", num as f64 / 1_000.0)
        } else {
            num.to_string()
        }
    }

    /// Keep the tail of long paths
    fn format_path(&self, path: &str, max_len: usize) -> String {
        if path.chars().count() <= max_len {
            return path.to_string();
        }

        let mut kept = Vec::new();
        let mut len = 3;
        for part in path.rsplit('/') {
            let part_len = part.chars().count() + 1;
            if len + part_len > max_len && !kept.is_empty() {
                break;
            }
            kept.push(part);
            len += part_len;
        }
        kept.reverse();

        format!(".../{}", kept.join("/"))
    }

    /// Generate the report as a string
    pub fn generate_report(&self, report: &RunReport) -> String {
        let files_title = if report.files.len() > 15 {
            "📋  TOP 10 LARGEST FILES"
        } else {
            "📋  PACKED FILES"
        };

        format!(
            "{}\n{}\n\n{}\n{}",
            files_title,
            self.create_files_table(report),
            "✅  CONTEXT READY",
            self.create_summary_table(report)
        )
    }

    /// Print the report to stdout
    pub fn print_report(&self, report: &RunReport) {
        println!("\n{}", self.generate_report(report));
    }

    fn create_summary_table(&self, report: &RunReport) -> String {
        #[derive(Tabled)]
        struct SummaryRow {
            #[tabled(rename = "Metric")]
            key: String,

            #[tabled(rename = "Value")]
            value: String,
        }

        let mut rows = vec![
            SummaryRow {
                key: "📂 Output".to_string(),
                value: report.outputs.join("\n"),
            },
            SummaryRow {
                key: "⏱️ Process Time".to_string(),
                value: format!("{:.4?}", report.duration),
            },
            SummaryRow {
                key: "📄 Files".to_string(),
                value: self.format_number(report.files.len()),
            },
            SummaryRow {
                key: "📝 Total Lines".to_string(),
                value: self.format_number(report.total_lines()),
            },
            SummaryRow {
                key: "📦 LLM Tokens".to_string(),
                value: format!(
                    "{} tokens (estimated)",
                    self.format_number(estimate_tokens(report.total_chars()))
                ),
            },
            SummaryRow {
                key: "🧩 Chunks".to_string(),
                value: format!(
                    "{} ({})",
                    report.chunks,
                    format_file_size(report.xml_bytes as u64)
                ),
            },
        ];

        if report.skipped > 0 {
            rows.push(SummaryRow {
                key: "⚠️ Skipped".to_string(),
                value: format!("{} items skipped", report.skipped),
            });
        }

        let mut table = Table::new(rows);
        table
            .with(Style::rounded())
            .with(Padding::new(1, 1, 0, 0))
            .with(Modify::new(Columns::new(..)).with(Alignment::left()));

        table.to_string()
    }

    fn create_files_table(&self, report: &RunReport) -> String {
        #[derive(Tabled)]
        struct FileRow {
            #[tabled(rename = "File Path")]
            path: String,

            #[tabled(rename = "Size")]
            size: String,

            #[tabled(rename = "Est. Tokens")]
            tokens: String,
        }

        let mut files: Vec<&FileReportInfo> = report.files.iter().collect();
        files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        if files.len() > 15 {
            files.truncate(10);
        }

        let rows: Vec<FileRow> = files
            .into_iter()
            .map(|file| FileRow {
                path: self.format_path(&file.path, 60),
                size: format_file_size(file.size),
                tokens: match &file.elided {
                    Some(reason) => format!("({})", reason),
                    None => self.format_number(estimate_tokens(file.chars)),
                },
            })
            .collect();

        let mut table = Table::new(rows);
        table
            .with(Style::rounded())
            .with(Padding::new(1, 1, 0, 0))
            .with(Modify::new(Columns::new(..)).with(Alignment::left()));

        table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, size: u64) -> FileReportInfo {
        FileReportInfo {
            path: path.to_string(),
            size,
            lines: 1,
            chars: size as usize,
            elided: None,
        }
    }

    fn report(files: Vec<FileReportInfo>, skipped: usize) -> RunReport {
        RunReport {
            outputs: vec!["project.xml".to_string()],
            duration: Duration::from_millis(12),
            files,
            chunks: 1,
            xml_bytes: 2048,
            skipped,
        }
    }

    #[test]
    fn test_small_report_lists_every_file() {
        let text = Reporter::new().generate_report(&report(vec![info("a.txt", 10), info("src/b.rs", 400)], 0));
        assert!(text.contains("PACKED FILES"));
        assert!(text.contains("a.txt"));
        assert!(text.contains("src/b.rs"));
        assert!(text.contains("project.xml"));
        assert!(!text.contains("skipped"));
    }

    #[test]
    fn test_large_report_shows_top_ten() {
        let files = (0..20).map(|i| info(&format!("f{:02}.txt", i), i * 100)).collect();
        let text = Reporter::new().generate_report(&report(files, 3));

        assert!(text.contains("TOP 10 LARGEST FILES"));
        assert!(text.contains("f19.txt"));
        assert!(text.contains("f10.txt"));
        assert!(!text.contains("f09.txt"));
        assert!(text.contains("3 items skipped"));
    }

    #[test]
    fn test_format_path_keeps_tail() {
        let reporter = Reporter::new();
        assert_eq!(reporter.format_path("src/a.rs", 60), "src/a.rs");

        let long = format!("{}/leaf/file.rs", "deep".repeat(20));
        let shown = reporter.format_path(&long, 20);
        assert!(shown.starts_with(".../"));
        assert!(shown.ends_with("leaf/file.rs"));
    }

    #[test]
    fn test_format_number() {
        let reporter = Reporter::new();
        assert_eq!(reporter.format_number(999), "999");
        assert_eq!(reporter.format_number(1_500), "1.5K");
        assert_eq!(reporter.format_number(2_500_000), "2.5M");
    }
}
